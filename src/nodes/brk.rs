//! `Break`: exits the current scope and hands its downstreams to the parent.

use async_trait::async_trait;

use crate::context::{Context, Handle};
use crate::error::FlowResult;
use crate::expr::FunctionRegistry;
use crate::node::{Node, NodeRef};
use crate::order::Order;

/// Emits `(control=Exit, recruit=downstreams)`. The scheduler cancels the current
/// scope and runs `downstreams` in the parent scope; the cancelled scope's owner is
/// never recalled.
#[derive(Debug)]
pub struct Break {
    uid: Handle,
    downstreams: Vec<NodeRef>,
}

impl Break {
    pub fn new(uid: Handle, downstreams: Vec<NodeRef>) -> Self {
        Break { uid, downstreams }
    }
}

#[async_trait]
impl Node for Break {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Break"
    }

    async fn activate(&self, _ctx: &Context, _registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        Ok(Order::idle(self.uid)
            .with_recruit(self.downstreams.clone())
            .exiting())
    }
}
