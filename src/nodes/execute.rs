//! `Execute`: a call to a registered callable.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::{Context, Handle};
use crate::error::FlowResult;
use crate::expr::{Expression, Fid, FunctionRegistry};
use crate::node::{Node, NodeRef};
use crate::order::{Order, WorkSource};

/// Represents a call to a registered callable. Emits exactly one order per activation,
/// with `source = Registered(fid)` and the user-wired expression inputs as `args`/
/// `kwargs`.
#[derive(Debug)]
pub struct Execute {
    uid: Handle,
    fid: Fid,
    args: Vec<Expression>,
    kwargs: HashMap<String, Expression>,
    recruit: Vec<NodeRef>,
}

impl Execute {
    pub fn new(uid: Handle, fid: Fid, args: Vec<Expression>, kwargs: HashMap<String, Expression>) -> Self {
        Execute {
            uid,
            fid,
            args,
            kwargs,
            recruit: Vec::new(),
        }
    }

    pub fn recruiting(mut self, recruit: Vec<NodeRef>) -> Self {
        self.recruit = recruit;
        self
    }
}

#[async_trait]
impl Node for Execute {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Execute"
    }

    async fn activate(&self, _ctx: &Context, _registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        Ok(Order::idle(self.uid)
            .with_source(WorkSource::Registered(self.fid))
            .with_args(self.args.clone(), self.kwargs.clone())
            .with_recruit(self.recruit.clone()))
    }
}
