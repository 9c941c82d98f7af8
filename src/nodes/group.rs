//! `Group`: wraps a compiled subgraph as a node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, Handle};
use crate::error::FlowResult;
use crate::expr::{Expression, FunctionRegistry};
use crate::node::{Node, NodeRef};
use crate::order::Order;

/// The callable surface a compiled [`crate::graph::Graph`] exposes to a `Group` node.
/// Calling it runs a full nested forward over the subgraph's starters.
#[async_trait]
pub trait GraphCallable: Send + Sync {
    async fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value>;
}

/// Invokes `graph`'s compiled callable with the group's bound inputs as arguments,
/// binds the result into the context under `uid` (via `Order::release`, since the call
/// happens inline during activation rather than through the executor), and recruits
/// `downstreams`.
#[derive(Clone)]
pub struct Group {
    uid: Handle,
    graph: Arc<dyn GraphCallable>,
    args: Vec<Expression>,
    kwargs: HashMap<String, Expression>,
    downstreams: Vec<NodeRef>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("uid", &self.uid).finish()
    }
}

impl Group {
    pub fn new(
        uid: Handle,
        graph: Arc<dyn GraphCallable>,
        args: Vec<Expression>,
        kwargs: HashMap<String, Expression>,
        downstreams: Vec<NodeRef>,
    ) -> Self {
        Group {
            uid,
            graph,
            args,
            kwargs,
            downstreams,
        }
    }
}

#[async_trait]
impl Node for Group {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Group"
    }

    async fn activate(&self, ctx: &Context, registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        let mut arg_values = Vec::with_capacity(self.args.len());
        for e in &self.args {
            arg_values.push(e.eval(ctx, registry)?);
        }
        let mut kwarg_values = HashMap::with_capacity(self.kwargs.len());
        for (name, e) in &self.kwargs {
            kwarg_values.insert(name.clone(), e.eval(ctx, registry)?);
        }
        let result = self.graph.call(arg_values, kwarg_values).await?;
        Ok(Order::idle(self.uid)
            .with_release(result)
            .with_recruit(self.downstreams.clone()))
    }
}
