//! `Repeat`/`Iter`: the two-node compound implementing bounded iteration.
//!
//! `Repeat` itself only ever activates once: it evaluates the iterable expression and
//! emits a seed order that opens a throwaway scope (`control = Enter`, `recall =
//! Iter(index 0)`, no recruits). That scope starts at count zero, so the scheduler's
//! "destination scope is done, push its recall" step fires immediately — `Iter`'s first
//! activation is scheduled back into *Repeat's own scope*, not a nested one. Each `Iter`
//! activation then does the real per-iteration work: it releases the current element
//! under `Repeat`'s handle, opens a fresh per-iteration scope recruiting the loop body
//! (`per_iteration`) into it, and sets the *next* `Iter` (a fresh value carrying the
//! advanced index, never a mutation of `self`) as that scope's recall. When the
//! per-iteration scope drains naturally, the next `Iter` is resumed in the same outer
//! scope — so iterations chain as siblings, never nesting deeper than one scope at a
//! time. On exhaustion, `Iter` instead emits a plain `control = None` order recruiting
//! `post_loop`, ending the chain.
//!
//! ```text
//!  Repeat.activate()  --ENTER(recall=Iter@0)-->  [scope count 0, drains instantly]
//!        --recall-->  Iter@0.activate() --ENTER(recall=Iter@1)--> per_iteration in scope S0
//!                                                                        │ drains
//!        --recall-->  Iter@1.activate() --ENTER(recall=Iter@2)--> per_iteration in scope S1
//!                                                                        │ drains
//!                     ...
//!        --recall-->  Iter@N.activate() --NONE, recruit=post_loop-->  (chain ends)
//! ```
//!
//! A `Break` reachable from `per_iteration` cancels its own iteration's scope (`S_i`)
//! and is wired, by the graph builder, to recruit the same `post_loop` set `Iter`
//! recruits on exhaustion — since a cancelled scope's recall is suppressed by the scope
//! manager's own policy, `post_loop` must be reachable from both exits, not solely from
//! natural exhaustion.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, Handle};
use crate::error::{FlowError, FlowResult};
use crate::expr::{Expression, FunctionRegistry};
use crate::node::{Node, NodeRef};
use crate::order::Order;

#[derive(Debug)]
pub struct Repeat {
    uid: Handle,
    iterable: Expression,
    per_iteration: Vec<NodeRef>,
    post_loop: Vec<NodeRef>,
}

impl Repeat {
    pub fn new(
        uid: Handle,
        iterable: Expression,
        per_iteration: Vec<NodeRef>,
        post_loop: Vec<NodeRef>,
    ) -> Self {
        Repeat {
            uid,
            iterable,
            per_iteration,
            post_loop,
        }
    }

    /// The common `range(start, stop, step)` factory: materializes the sequence at
    /// construction time rather than lazily, since the range bounds are themselves
    /// plain integers, not expressions evaluated against the context.
    pub fn range(
        uid: Handle,
        start: i64,
        stop: i64,
        step: i64,
        per_iteration: Vec<NodeRef>,
        post_loop: Vec<NodeRef>,
    ) -> Self {
        let mut items = Vec::new();
        let mut i = start;
        if step > 0 {
            while i < stop {
                items.push(Value::from(i));
                i += step;
            }
        } else if step < 0 {
            while i > stop {
                items.push(Value::from(i));
                i += step;
            }
        }
        Repeat::new(uid, Expression::Constant(Value::Array(items)), per_iteration, post_loop)
    }
}

#[async_trait]
impl Node for Repeat {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Repeat"
    }

    async fn activate(&self, ctx: &Context, registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        let value = self.iterable.eval(ctx, registry)?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(FlowError::ExpressionFailed(format!(
                    "Repeat's iterable must evaluate to an array, got {other:?}"
                )))
            }
        };
        let iter = Arc::new(Iter {
            uid: self.uid,
            items: Arc::new(items),
            index: 0,
            per_iteration: self.per_iteration.clone(),
            post_loop: self.post_loop.clone(),
        });
        Ok(Order::idle(self.uid).entering(iter))
    }
}

/// The stateful continuation `Repeat` hands off to. Each activation returns a *fresh*
/// `Iter` (never mutates `self`) to carry the advanced index, per the state-machine
/// redesign.
#[derive(Debug)]
pub struct Iter {
    uid: Handle,
    items: Arc<Vec<Value>>,
    index: usize,
    per_iteration: Vec<NodeRef>,
    post_loop: Vec<NodeRef>,
}

#[async_trait]
impl Node for Iter {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Iter"
    }

    async fn activate(&self, _ctx: &Context, _registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        if self.index < self.items.len() {
            let value = self.items[self.index].clone();
            let next = Arc::new(Iter {
                uid: self.uid,
                items: Arc::clone(&self.items),
                index: self.index + 1,
                per_iteration: self.per_iteration.clone(),
                post_loop: self.post_loop.clone(),
            });
            Ok(Order::idle(self.uid)
                .with_release(value)
                .with_recruit(self.per_iteration.clone())
                .entering(next))
        } else {
            Ok(Order::idle(self.uid).with_recruit(self.post_loop.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRegistry;
    impl FunctionRegistry for NoopRegistry {
        fn call(
            &self,
            _fid: crate::expr::Fid,
            _args: Vec<Value>,
            _kwargs: std::collections::HashMap<String, Value>,
        ) -> FlowResult<Value> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn range_factory_materializes_expected_sequence() {
        let repeat = Repeat::range(crate::context::fresh_handle(), 0, 5, 2, vec![], vec![]);
        let ctx = Context::new();
        let order = repeat.activate(&ctx, &NoopRegistry).await.unwrap();
        assert!(order.recall.is_some());
    }

    #[tokio::test]
    async fn iter_exhausts_after_last_element() {
        let iter = Iter {
            uid: crate::context::fresh_handle(),
            items: Arc::new(vec![Value::from(1)]),
            index: 1,
            per_iteration: vec![],
            post_loop: vec![],
        };
        let ctx = Context::new();
        let order = iter.activate(&ctx, &NoopRegistry).await.unwrap();
        assert!(order.recall.is_none());
        assert_eq!(order.control, crate::order::Control::None);
    }
}
