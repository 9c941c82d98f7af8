//! `Join`: a barrier synchroniser over `n` receiver arrivals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, Handle};
use crate::error::FlowResult;
use crate::expr::FunctionRegistry;
use crate::node::{Node, NodeRef};
use crate::order::Order;

/// Wire any upstream node's `recruit` set to include the shared `Join` node to make it
/// a "receiver": the first `n - 1` activations of `Join` are no-ops, and the `n`-th
/// resets the counter and recruits `downstreams`.
#[derive(Debug)]
pub struct Join {
    uid: Handle,
    n: usize,
    count: Arc<AtomicUsize>,
    downstreams: Vec<NodeRef>,
}

impl Join {
    pub fn new(uid: Handle, n: usize, downstreams: Vec<NodeRef>) -> Self {
        Join {
            uid,
            n,
            count: Arc::new(AtomicUsize::new(0)),
            downstreams,
        }
    }
}

#[async_trait]
impl Node for Join {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Join"
    }

    async fn activate(&self, _ctx: &Context, _registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        let arrived = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if arrived >= self.n {
            self.count.store(0, Ordering::SeqCst);
            Ok(Order::idle(self.uid).with_recruit(self.downstreams.clone()))
        } else {
            Ok(Order::idle(self.uid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fresh_handle;

    struct NoopRegistry;
    impl FunctionRegistry for NoopRegistry {
        fn call(
            &self,
            _fid: crate::expr::Fid,
            _args: Vec<serde_json::Value>,
            _kwargs: std::collections::HashMap<String, serde_json::Value>,
        ) -> FlowResult<serde_json::Value> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn releases_only_on_nth_arrival() {
        let ctx = Context::new();
        let downstream: NodeRef = Arc::new(crate::nodes::execute::Execute::new(
            fresh_handle(),
            0,
            vec![],
            std::collections::HashMap::new(),
        ));
        let join = Join::new(fresh_handle(), 2, vec![downstream]);
        let first = join.activate(&ctx, &NoopRegistry).await.unwrap();
        assert!(first.recruit.is_empty(), "first of two arrivals must not release");
        let second = join.activate(&ctx, &NoopRegistry).await.unwrap();
        assert_eq!(second.recruit.len(), 1, "second arrival must release downstreams exactly once");
        let third = join.activate(&ctx, &NoopRegistry).await.unwrap();
        assert!(third.recruit.is_empty(), "counter must reset after releasing");
    }
}
