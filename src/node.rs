//! The node activation protocol.
//!
//! A node is anything that can be asked, once per activation, for its next
//! [`Order`]. The original engine models this with a generator: a node yields an
//! `Order`, the scheduler drives the resulting scope, and the node may be resumed to
//! yield again. Rust has no generators usable across an object-safe trait, so this port
//! follows the state-machine redesign: `activate` takes `&self` and returns exactly one
//! `Order`; any further activation is expressed functionally through
//! [`Order::recall`](crate::order::Order::recall), which carries a *fresh* node value
//! (not `self` mutated in place) to re-enqueue when its scope drains. [`Repeat`]'s
//! internal `Iter` is the canonical example: each re-activation returns a new `Iter`
//! holding the advanced iteration state, rather than mutating a shared one.
//!
//! Concrete nodes live in [`crate::nodes`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, Handle};
use crate::error::FlowResult;
use crate::expr::FunctionRegistry;
use crate::order::Order;

/// An entity exposing `activate(context) -> Order`.
///
/// `activate` must not block: any work that could take meaningful wall-clock time has
/// to be delegated to the executor via `Order::source`, never performed inline here.
/// `registry` is threaded through so a node can evaluate its own expression inputs
/// (e.g. `Branch`'s condition, `Repeat`'s iterable) synchronously against the context.
#[async_trait]
pub trait Node: Send + Sync + fmt::Debug {
    /// The handle this node's result cell is written under.
    fn uid(&self) -> Handle;

    /// A short, human-readable label for logging (defaults to the type name).
    fn label(&self) -> &'static str {
        "node"
    }

    async fn activate(&self, ctx: &Context, registry: &dyn FunctionRegistry) -> FlowResult<Order>;
}

/// Convenience alias for the shared, cloneable handle every scheduler queue entry and
/// `Order::recruit`/`recall` field carries.
pub type NodeRef = Arc<dyn Node>;
