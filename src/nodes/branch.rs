//! `Branch`: reads a single boolean expression and recruits one of two downstream sets.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, Handle};
use crate::error::{FlowError, FlowResult};
use crate::expr::{Expression, FunctionRegistry};
use crate::node::{Node, NodeRef};
use crate::order::Order;

/// Emits a control-only order recruiting `if_true` or `if_false` depending on the
/// truthiness of `condition`. Failure to evaluate the condition surfaces as
/// `SubscriptionFailed` (the "SubscribeError" of the component design).
#[derive(Debug)]
pub struct Branch {
    uid: Handle,
    condition: Expression,
    if_true: Vec<NodeRef>,
    if_false: Vec<NodeRef>,
}

impl Branch {
    pub fn new(uid: Handle, condition: Expression, if_true: Vec<NodeRef>, if_false: Vec<NodeRef>) -> Self {
        Branch {
            uid,
            condition,
            if_true,
            if_false,
        }
    }
}

/// Standard boolean coercion: `false`, `null`, `0`, `0.0`, `""`, empty array/object are
/// falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[async_trait]
impl Node for Branch {
    fn uid(&self) -> Handle {
        self.uid
    }

    fn label(&self) -> &'static str {
        "Branch"
    }

    async fn activate(&self, ctx: &Context, registry: &dyn FunctionRegistry) -> FlowResult<Order> {
        let value = self
            .condition
            .eval(ctx, registry)
            .map_err(|e| FlowError::SubscriptionFailed {
                node: self.uid,
                message: e.to_string(),
            })?;
        let recruit = if is_truthy(&value) {
            self.if_true.clone()
        } else {
            self.if_false.clone()
        };
        Ok(Order::idle(self.uid).with_recruit(recruit))
    }
}
