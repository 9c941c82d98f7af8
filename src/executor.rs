//! The executor contract and its reference implementation: a bounded `tokio` worker pool.
//!
//! ```text
//!                  register(worker) -> fid
//!  Scheduler  ───────────────────────────────────▶  Executor
//!      │                                             (WorkerPoolExecutor)
//!      │  submit(source, ctx_view, args, kwargs)      │
//!      │ ───────────────────────────────────────────▶ │  Semaphore permit
//!      │                                               │       │
//!      │                                               ▼       ▼
//!      │                                          tokio::spawn(worker.call(..))
//!      │                                               │
//!      │ ◀─────────────────────────────────────────────┘
//!      │   ExecutorEvent{task_id, status, value, error}  (oneshot, exactly once)
//! ```
//!
//! `submit` evaluates `args`/`kwargs` against the supplied context view itself — the
//! scheduler hands it unevaluated expressions plus the minimal view those expressions
//! read, per §4.6 of the component design. The worker registry is owned by the executor
//! instance, not a process-global, per the Design Notes' callers-should-scope-it
//! guidance; the same registry backs [`Expression::Function`](crate::expr::Expression)
//! dispatch so a single `fid` namespace serves both node work and inline expression
//! calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::context::Context;
use crate::error::{ErrorPayload, FlowError, FlowResult};
use crate::expr::{Expression, Fid, FunctionRegistry};
use crate::formula::{self, Formula};
use crate::order::WorkSource;

pub type TaskId = u64;

/// The worker contract: `callable(*args, **kwargs)`, per §6.
///
/// Implemented as a synchronous call (rather than `async_trait`) because it mirrors the
/// original "plain callable" contract exactly; `WorkerPoolExecutor` is responsible for
/// running it off the async runtime's worker threads without blocking them.
pub trait Worker: Send + Sync {
    fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value>;
}

impl<F> Worker for F
where
    F: Fn(Vec<Value>, HashMap<String, Value>) -> FlowResult<Value> + Send + Sync,
{
    fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
        self(args, kwargs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failed,
    Cancelled,
}

/// The event an executor delivers exactly once per submitted task.
#[derive(Debug, Clone)]
pub struct ExecutorEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub value: Option<Value>,
    pub error: Option<ErrorPayload>,
}

/// Configuration for the reference worker-pool executor.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Max number of tasks allowed to run concurrently.
    pub worker_count: usize,
    /// Soft hint only, logged via `tracing::warn!` when exceeded; the pool does not
    /// refuse submissions past this point.
    pub task_queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig {
            worker_count: num_cpus::get().max(1),
            task_queue_capacity: 4096,
        }
    }
}

struct TaskHandle {
    join: JoinHandle<()>,
}

/// The reference executor: a bounded worker pool built on `tokio::spawn` plus a
/// `Semaphore` for the concurrency bound, an `Arc<RwLock<HashMap>>` worker registry, and
/// a `oneshot` channel per task for exactly-once event delivery.
pub struct WorkerPoolExecutor {
    registry: Arc<RwLock<HashMap<Fid, Arc<dyn Worker>>>>,
    next_fid: AtomicU64,
    next_task: AtomicU64,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<RwLock<HashMap<TaskId, TaskHandle>>>,
    config: WorkerPoolConfig,
}

impl WorkerPoolExecutor {
    pub fn new(config: WorkerPoolConfig) -> Self {
        WorkerPoolExecutor {
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_fid: AtomicU64::new(1),
            next_task: AtomicU64::new(1),
            semaphore: Arc::new(Semaphore::new(config.worker_count)),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Process-lifetime (in practice, executor-lifetime) registration of a worker
    /// callable.
    #[instrument(skip(self, worker))]
    pub fn register(&self, worker: Arc<dyn Worker>) -> Fid {
        let fid = self.next_fid.fetch_add(1, Ordering::Relaxed);
        self.registry.write().insert(fid, worker);
        debug!(fid, "registered worker");
        fid
    }

    /// Asynchronously evaluate `args`/`kwargs` against `ctx_view` and invoke `source`,
    /// delivering exactly one [`ExecutorEvent`] on the returned receiver.
    #[instrument(skip(self, ctx_view, args, kwargs))]
    pub fn submit(
        &self,
        source: WorkSource,
        ctx_view: Context,
        args: Vec<Expression>,
        kwargs: HashMap<String, Expression>,
    ) -> oneshot::Receiver<ExecutorEvent> {
        let task_id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if self.in_flight.read().len() >= self.config.task_queue_capacity {
            warn!(task_id, capacity = self.config.task_queue_capacity, "in-flight task count exceeds soft capacity hint");
        }

        let registry = Arc::clone(&self.registry);
        let semaphore = Arc::clone(&self.semaphore);
        let in_flight = Arc::clone(&self.in_flight);

        let join = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let event = run_task(task_id, source, ctx_view, args, kwargs, registry.as_ref()).await;
            in_flight.write().remove(&task_id);
            let _ = tx.send(event);
        });

        self.in_flight.write().insert(task_id, TaskHandle { join });
        rx
    }

    /// Best-effort cancellation: a not-yet-polled task is aborted outright; a running
    /// task is left to finish (`submit`'s caller sees whatever event `run_task`
    /// produces — this executor does not rewrite a finished SUCCESS/FAILED to
    /// CANCELLED after the fact, so the "choice must be consistent" requirement is met
    /// by always preferring the real outcome once work has actually started).
    pub fn cancel(&self, task_id: TaskId) -> bool {
        if let Some(handle) = self.in_flight.write().remove(&task_id) {
            handle.join.abort();
            true
        } else {
            false
        }
    }

    /// Cancel all pending work; if `wait`, block until in-flight tasks finish (aborted
    /// tasks resolve immediately once the runtime schedules the abort).
    pub async fn shutdown(&self, wait: bool) {
        let handles: Vec<TaskHandle> = {
            let mut guard = self.in_flight.write();
            guard.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.join.abort();
        }
        if wait {
            for handle in handles {
                let _ = handle.join.await;
            }
        }
    }
}

impl FunctionRegistry for WorkerPoolExecutor {
    fn call(&self, fid: Fid, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
        let worker = self
            .registry
            .read()
            .get(&fid)
            .cloned()
            .ok_or_else(|| FlowError::ExpressionFailed(format!("no worker registered under fid {fid}")))?;
        worker.call(args, kwargs)
    }
}

async fn run_task(
    task_id: TaskId,
    source: WorkSource,
    ctx_view: Context,
    args: Vec<Expression>,
    kwargs: HashMap<String, Expression>,
    registry: &RwLock<HashMap<Fid, Arc<dyn Worker>>>,
) -> ExecutorEvent {
    let eval_registry = RegistryView(registry);
    let mut arg_values = Vec::with_capacity(args.len());
    for a in &args {
        match a.eval(&ctx_view, &eval_registry) {
            Ok(v) => arg_values.push(v),
            Err(e) => return failed_event(task_id, &e),
        }
    }
    let mut kwarg_values = HashMap::with_capacity(kwargs.len());
    for (name, e) in &kwargs {
        match e.eval(&ctx_view, &eval_registry) {
            Ok(v) => {
                kwarg_values.insert(name.clone(), v);
            }
            Err(e) => return failed_event(task_id, &e),
        }
    }

    match source {
        WorkSource::Registered(fid) => {
            let worker = match registry.read().get(&fid).cloned() {
                Some(w) => w,
                None => {
                    let err = FlowError::TaskFailed {
                        message: format!("no worker registered under fid {fid}"),
                        traceback: String::new(),
                    };
                    return failed_event(task_id, &err);
                }
            };
            match worker.call(arg_values, kwarg_values) {
                Ok(value) => ExecutorEvent {
                    task_id,
                    status: TaskStatus::Success,
                    value: Some(value),
                    error: None,
                },
                Err(e) => failed_event(task_id, &e),
            }
        }
        WorkSource::Literal(src) => match run_literal(&src, kwarg_values) {
            Ok(value) => ExecutorEvent {
                task_id,
                status: TaskStatus::Success,
                value: Some(value),
                error: None,
            },
            Err(e) => failed_event(task_id, &e),
        },
        WorkSource::None => ExecutorEvent {
            task_id,
            status: TaskStatus::Success,
            value: None,
            error: None,
        },
    }
}

/// Literal-source work: interpret `src` as a formula, binding `kwargs` as its free
/// variables. Positional `args` have no name to bind under and are ignored, matching
/// `Formula`'s named-bindings-only contract.
fn run_literal(src: &str, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
    let formula = Formula::parse(src).map_err(FlowError::ExpressionFailed)?;
    formula::evaluate(&formula, &kwargs).map_err(FlowError::ExpressionFailed)
}

fn failed_event(task_id: TaskId, error: &FlowError) -> ExecutorEvent {
    ExecutorEvent {
        task_id,
        status: TaskStatus::Failed,
        value: None,
        error: Some(ErrorPayload::from(error)),
    }
}

/// Adapts the bare worker map into a [`FunctionRegistry`] for the duration of a single
/// task's argument evaluation, without taking a second lock type.
struct RegistryView<'a>(&'a RwLock<HashMap<Fid, Arc<dyn Worker>>>);

impl FunctionRegistry for RegistryView<'_> {
    fn call(&self, fid: Fid, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
        let worker = self
            .0
            .read()
            .get(&fid)
            .cloned()
            .ok_or_else(|| FlowError::ExpressionFailed(format!("no worker registered under fid {fid}")))?;
        worker.call(args, kwargs)
    }
}

#[async_trait]
impl crate::scheduler::WorkSubmitter for WorkerPoolExecutor {
    async fn submit_order(
        &self,
        source: WorkSource,
        ctx_view: Context,
        args: Vec<Expression>,
        kwargs: HashMap<String, Expression>,
    ) -> ExecutorEvent {
        let rx = self.submit(source, ctx_view, args, kwargs);
        match rx.await {
            Ok(event) => event,
            Err(_) => ExecutorEvent {
                task_id: 0,
                status: TaskStatus::Cancelled,
                value: None,
                error: None,
            },
        }
    }

    fn register_worker(&self, worker: Arc<dyn Worker>) -> Fid {
        self.register(worker)
    }

    fn function_registry(&self) -> &dyn FunctionRegistry {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_worker() -> Arc<dyn Worker> {
        Arc::new(|args: Vec<Value>, _kwargs: HashMap<String, Value>| {
            let x = args[0].as_f64().unwrap_or(0.0);
            let y = args[1].as_f64().unwrap_or(0.0);
            Ok(Value::from(x + y))
        })
    }

    #[tokio::test]
    async fn submit_delivers_success_exactly_once() {
        let exec = WorkerPoolExecutor::new(WorkerPoolConfig::default());
        let fid = exec.register(add_worker());
        let rx = exec.submit(
            WorkSource::Registered(fid),
            Context::new(),
            vec![Expression::constant(2), Expression::constant(3)],
            HashMap::new(),
        );
        let event = rx.await.unwrap();
        assert_eq!(event.status, TaskStatus::Success);
        assert_eq!(event.value.unwrap(), Value::from(5.0));
    }

    #[tokio::test]
    async fn submit_unknown_fid_fails() {
        let exec = WorkerPoolExecutor::new(WorkerPoolConfig::default());
        let rx = exec.submit(WorkSource::Registered(999), Context::new(), vec![], HashMap::new());
        let event = rx.await.unwrap();
        assert_eq!(event.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn submit_literal_source_evaluates_formula() {
        let exec = WorkerPoolExecutor::new(WorkerPoolConfig::default());
        let mut kwargs = HashMap::new();
        kwargs.insert("x".to_string(), Expression::constant(4));
        let rx = exec.submit(
            WorkSource::Literal("sqrt(x) + 1".to_string()),
            Context::new(),
            vec![],
            kwargs,
        );
        let event = rx.await.unwrap();
        assert_eq!(event.status, TaskStatus::Success);
        assert_eq!(event.value.unwrap(), Value::from(3.0));
    }

    #[tokio::test]
    async fn shutdown_aborts_pending_tasks() {
        let exec = WorkerPoolExecutor::new(WorkerPoolConfig {
            worker_count: 1,
            task_queue_capacity: 16,
        });
        exec.shutdown(true).await;
    }
}
