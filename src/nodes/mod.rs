//! The concrete node library: Execute, Branch, Repeat, Break, Join, Group.
//!
//! Each node implements [`crate::node::Node`] following the state-machine redesign
//! (§9): `activate` takes `&self` and returns exactly one [`crate::order::Order`]; where
//! the original generator would yield again on a later turn, these nodes instead either
//! encode the continuation as a *fresh* node value passed through `Order::recall`
//! ([`repeat::Iter`] is the non-trivial case) or simply have nothing left to do after one
//! order (`Execute`, `Branch`, `Break`, `Group`).

pub mod branch;
pub mod brk;
pub mod execute;
pub mod group;
pub mod join;
pub mod repeat;

pub use branch::Branch;
pub use brk::Break;
pub use execute::Execute;
pub use group::Group;
pub use join::Join;
pub use repeat::Repeat;
