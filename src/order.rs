//! [`Order`]: the immutable value a node emits at each activation.
//!
//! An order tells the scheduler everything it needs to dispatch one step of a node:
//! where the result goes (`uid`), what work (if any) to run (`source`/`args`/`kwargs`),
//! an eagerly-visible value to bind before the work resolves (`release`), who to wake up
//! afterwards (`recruit`), and whether this step opens or closes a scope (`control`,
//! `recall`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Handle;
use crate::expr::{Expression, Fid};
use crate::node::Node;

/// What work, if any, an order's `source` asks the executor to run.
#[derive(Debug, Clone)]
pub enum WorkSource {
    /// A pure scheduling step: no work unit is submitted to the executor.
    None,
    /// Invoke the callable registered under this id.
    Registered(Fid),
    /// Evaluate literal source text (used by nodes that wrap a formula-like callable
    /// rather than a pre-registered one).
    Literal(String),
}

impl WorkSource {
    pub fn is_none(&self) -> bool {
        matches!(self, WorkSource::None)
    }
}

/// Whether an order opens a fresh scope, closes the current one, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    None,
    Enter,
    Exit,
}

/// The scheduler-visible description of a node's next step: work, control flow, and
/// the set of downstream nodes to recruit once this step completes.
#[derive(Clone)]
pub struct Order {
    pub uid: Handle,
    pub source: WorkSource,
    pub args: Vec<Expression>,
    pub kwargs: HashMap<String, Expression>,
    pub release: Option<Value>,
    pub recruit: Vec<Arc<dyn Node>>,
    pub control: Control,
    pub recall: Option<Arc<dyn Node>>,
}

impl std::fmt::Debug for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Order")
            .field("uid", &self.uid)
            .field("source", &self.source)
            .field("release", &self.release)
            .field("recruit_count", &self.recruit.len())
            .field("control", &self.control)
            .field("has_recall", &self.recall.is_some())
            .finish()
    }
}

impl Order {
    /// A bare scheduling step with no work, no control change, and no recruits.
    pub fn idle(uid: Handle) -> Self {
        Order {
            uid,
            source: WorkSource::None,
            args: Vec::new(),
            kwargs: HashMap::new(),
            release: None,
            recruit: Vec::new(),
            control: Control::None,
            recall: None,
        }
    }

    pub fn with_recruit(mut self, recruit: Vec<Arc<dyn Node>>) -> Self {
        self.recruit = recruit;
        self
    }

    pub fn with_source(mut self, source: WorkSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_args(mut self, args: Vec<Expression>, kwargs: HashMap<String, Expression>) -> Self {
        self.args = args;
        self.kwargs = kwargs;
        self
    }

    pub fn with_release(mut self, value: Value) -> Self {
        self.release = Some(value);
        self
    }

    pub fn entering(mut self, recall: Arc<dyn Node>) -> Self {
        self.control = Control::Enter;
        self.recall = Some(recall);
        self
    }

    pub fn exiting(mut self) -> Self {
        self.control = Control::Exit;
        self
    }
}
