//! Typed, code-tagged failures for the expression, node, scheduler and executor layers.
//!
//! Every caller-visible failure is a variant of [`FlowError`]. Each variant maps to a
//! stable dotted error code (see [`FlowError::code`]) so that logs, error-hook callbacks
//! and downstream tooling can match on the code string rather than the `Debug`
//! representation, which is free to change.
//!
//! Two error classes recur throughout this crate and are called out explicitly because
//! they drive control flow rather than just being reported:
//!
//! - **Recoverable expression errors** — [`FlowError::DataNotFound`],
//!   [`FlowError::DataGetItem`] and [`FlowError::ExpressionFailed`] are the set a
//!   [`Union`](crate::expr::Expression::Union) expression catches while trying the next
//!   alternative. Any other variant propagates through a union unchanged.
//! - **Scope-fatal errors** — [`FlowError::CircularRecruitment`] aborts the whole forward
//!   pass; everything else is scoped to a single node activation and only decrements
//!   that activation's scope count.

use std::fmt;

use crate::context::Handle;

/// Result alias used throughout the crate.
pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("handle {0} has no bound value")]
    DataNotFound(Handle),

    #[error("get-item on handle {handle} failed: {message}")]
    DataGetItem { handle: Handle, message: String },

    #[error("all {0} union branches failed")]
    UnionFailed(usize),

    #[error("expression evaluation failed: {0}")]
    ExpressionFailed(String),

    #[error("node {node} subscription failed: {message}")]
    SubscriptionFailed { node: Handle, message: String },

    #[error("exposed output {key:?} failed: {source}")]
    ExposedNotFound {
        key: String,
        #[source]
        source: Box<FlowError>,
    },

    #[error("required parameter {0:?} missing and no default given")]
    ParamMissing(String),

    #[error("node {0} attempted to recruit itself through an active scope")]
    CircularRecruitment(Handle),

    #[error("task failed: {message}")]
    TaskFailed { message: String, traceback: String },

    #[error("cell for handle {0} read before being written")]
    CellEmpty(Handle),
}

impl FlowError {
    /// The stable dotted error code for this failure, per the external error table.
    ///
    /// `CellEmpty` has no code of its own: it is an internal detail of
    /// `Cell::get` (crate::context::Cell) and is always surfaced as
    /// `DataNotFound` by the time it reaches expression evaluation.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::DataNotFound(_) => "SCHEDULING_ERROR.DATA_NOTFOUND",
            FlowError::DataGetItem { .. } => "SCHEDULING_ERROR.DATA_GETITEM_FAILED",
            FlowError::UnionFailed(_) => "SCHEDULING_ERROR.UNION_FAILED",
            FlowError::ExpressionFailed(_) => "SCHEDULING_ERROR.EXPRESSION_FAILED",
            FlowError::SubscriptionFailed { .. } => "SCHEDULING_ERROR.SUBSCRIPTION_FAILED",
            FlowError::ExposedNotFound { .. } => "SCHEDULING_ERROR.EXPOSED_NOTFOUND",
            FlowError::ParamMissing(_) => "SCHEDULING_ERROR.PARAM_MISSING",
            FlowError::CircularRecruitment(_) => "SCHEDULING_ERROR.CIRCULAR_RECRUITMENT",
            FlowError::TaskFailed { .. } => "EXECUTION_ERROR.TASK_FAILED",
            FlowError::CellEmpty(_) => "SCHEDULING_ERROR.DATA_NOTFOUND",
        }
    }

    /// Whether this error belongs to the set a
    /// [`Union`](crate::expr::Expression::Union) expression recovers from:
    /// {DataNotFound, DataGetItem, ExprEval}.
    pub fn is_union_recoverable(&self) -> bool {
        matches!(
            self,
            FlowError::DataNotFound(_)
                | FlowError::DataGetItem { .. }
                | FlowError::ExpressionFailed(_)
                | FlowError::CellEmpty(_)
        )
    }

    pub fn task_failed(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        FlowError::TaskFailed {
            message: message.into(),
            traceback: traceback.into(),
        }
    }

    pub fn exposed_not_found(key: impl Into<String>, source: FlowError) -> Self {
        FlowError::ExposedNotFound {
            key: key.into(),
            source: Box::new(source),
        }
    }
}

/// The wire-shape of an executor completion event's error payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub traceback: String,
}

impl From<&FlowError> for ErrorPayload {
    fn from(err: &FlowError) -> Self {
        let traceback = match err {
            FlowError::TaskFailed { traceback, .. } => traceback.clone(),
            _ => String::new(),
        };
        ErrorPayload {
            kind: err.code().to_string(),
            message: err.to_string(),
            traceback,
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
