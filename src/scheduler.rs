//! The concurrent scheduler: ready queue, in-flight bound, scope accounting, and the
//! coupling between executor events and scope bookkeeping.
//!
//! ```text
//!  ready: VecDeque<(NodeRef, ScopeId)>          in_flight: FuturesUnordered<...>
//!  ┌───────────────────────────┐                ┌─────────────────────────────┐
//!  │ (starter_a, root)         │   activate()    │ task for (scope, order) #1  │
//!  │ (starter_b, root)         │ ─────────────▶  │ task for (scope, order) #2  │
//!  └───────────────────────────┘   submit work   └─────────────────────────────┘
//!             ▲                                               │
//!             │            recall / recruit pushed here        │ executor event
//!             └──────────────── scope bookkeeping ◀────────────┘
//! ```
//!
//! One [`Scheduler::forward`] call is one end-to-end invocation over a graph's starter
//! nodes: it drains `ready` (bounded by `max_inflight` concurrently in-flight orders),
//! submits work through a [`WorkSubmitter`], and on every completion — synchronous
//! control-only order or asynchronous executor event — runs the scope bookkeeping in
//! §4.6: open a scope on `ENTER`, cancel one on `EXIT`, recruit downstreams into the
//! right scope, and push a recall when a scope drains naturally.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{debug, error, instrument, warn};

use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::executor::{ExecutorEvent, TaskStatus, Worker};
use crate::expr::{Expression, Fid, FunctionRegistry};
use crate::node::NodeRef;
use crate::order::{Control, Order, WorkSource};
use crate::scope::{Drained, ScopeId, ScopeManager, ROOT_SCOPE};
use async_trait::async_trait;

/// The seam between the scheduler and an executor implementation. The reference
/// implementation is [`crate::executor::WorkerPoolExecutor`]; a test harness can supply
/// its own to control timing deterministically.
#[async_trait]
pub trait WorkSubmitter: Send + Sync {
    async fn submit_order(
        &self,
        source: WorkSource,
        ctx_view: Context,
        args: Vec<Expression>,
        kwargs: HashMap<String, Expression>,
    ) -> ExecutorEvent;

    fn register_worker(&self, worker: Arc<dyn Worker>) -> Fid;

    fn function_registry(&self) -> &dyn FunctionRegistry;
}

/// Tunables for [`Scheduler::forward`]. `max_inflight` is the only knob named directly
/// by the concurrency model (§5); the other two only affect the reference executor's
/// own soft-capacity warnings and worker count and are forwarded at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_inflight: usize,
    pub ready_queue_capacity: usize,
    pub worker_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_inflight: 1000,
            ready_queue_capacity: 4096,
            worker_count: num_cpus::get().max(1),
        }
    }
}

/// A registered error-hook: invoked with every node-level error the scheduler absorbs
/// (the activation that failed is still marked complete; siblings continue).
pub type ErrorHook = Arc<dyn Fn(&FlowError) + Send + Sync>;

pub struct Scheduler<E: WorkSubmitter> {
    executor: Arc<E>,
    config: SchedulerConfig,
    error_hooks: Vec<ErrorHook>,
}

struct Pending {
    scope_id: ScopeId,
    order: Order,
}

impl<E: WorkSubmitter> Scheduler<E> {
    pub fn new(executor: Arc<E>, config: SchedulerConfig) -> Self {
        Scheduler {
            executor,
            config,
            error_hooks: Vec::new(),
        }
    }

    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hooks.push(hook);
        self
    }

    /// The executor's worker/function registry, needed by a compiled graph to evaluate
    /// exposed `Function` expressions after a forward completes.
    pub fn executor_registry(&self) -> &dyn FunctionRegistry {
        self.executor.function_registry()
    }

    fn emit_error(&self, err: &FlowError) {
        error!(code = err.code(), message = %err, "node activation error absorbed");
        for hook in &self.error_hooks {
            hook(err);
        }
    }

    /// Drive `starters` to completion against `ctx`, returning once the root scope
    /// drains. `ctx` is mutated in place: node results are bound into it as they
    /// complete.
    #[instrument(skip(self, starters, ctx))]
    pub async fn forward(&self, starters: Vec<NodeRef>, ctx: &mut Context) -> FlowResult<()> {
        let mut scopes = ScopeManager::new(starters.len());
        let mut ready: VecDeque<(NodeRef, ScopeId)> =
            starters.into_iter().map(|n| (n, ROOT_SCOPE)).collect();
        let mut in_flight: FuturesUnordered<
            std::pin::Pin<Box<dyn std::future::Future<Output = (ScopeId, Order, ExecutorEvent)> + Send>>,
        > = FuturesUnordered::new();

        loop {
            while !ready.is_empty() && in_flight.len() < self.config.max_inflight {
                if ready.len() > self.config.ready_queue_capacity {
                    warn!(len = ready.len(), capacity = self.config.ready_queue_capacity, "ready queue exceeds soft capacity hint");
                }
                let (node, scope_id) = ready.pop_front().expect("checked non-empty");
                if scopes.is_done(scope_id) {
                    continue;
                }

                let order = match node.activate(ctx, self.executor.function_registry()).await {
                    Ok(order) => order,
                    Err(err) => {
                        if let FlowError::CircularRecruitment(_) = err {
                            return Err(err);
                        }
                        self.emit_error(&err);
                        self.complete_control_only(&mut scopes, &mut ready, scope_id);
                        continue;
                    }
                };

                if let Some(value) = order.release.clone() {
                    ctx.bind(order.uid, ctx.new_cell(Some(value)));
                }

                if order.source.is_none() {
                    debug!(uid = order.uid, scope_id, "control-only order");
                    self.complete_order(&mut scopes, &mut ready, scope_id, order)?;
                } else {
                    let refs = order_refs(&order);
                    let view = ctx.view(&refs);
                    let executor = Arc::clone(&self.executor);
                    let source = order.source.clone();
                    let args = order.args.clone();
                    let kwargs = order.kwargs.clone();
                    let fut = async move {
                        let event = executor.submit_order(source, view, args, kwargs).await;
                        (scope_id, order, event)
                    };
                    in_flight.push(Box::pin(fut));
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let (scope_id, order, event) = in_flight.next().await.expect("checked non-empty");
            match event.status {
                TaskStatus::Success => {
                    if let Some(value) = event.value {
                        ctx.bind(order.uid, ctx.new_cell(Some(value)));
                    }
                    self.complete_order(&mut scopes, &mut ready, scope_id, order)?;
                }
                TaskStatus::Failed => {
                    if let Some(payload) = &event.error {
                        debug!(uid = order.uid, code = %payload.kind, "task failed");
                    }
                    self.complete_control_only(&mut scopes, &mut ready, scope_id);
                }
                TaskStatus::Cancelled => {
                    self.complete_control_only(&mut scopes, &mut ready, scope_id);
                }
            }
        }

        Ok(())
    }

    /// Scope bookkeeping (§4.6) for an order that was handled purely (no recruit/control
    /// processing ever skipped): applies ENTER/EXIT/NONE, dispatches recruits into the
    /// right destination scope, and pushes a recall if the destination scope drained.
    fn complete_order(
        &self,
        scopes: &mut ScopeManager,
        ready: &mut VecDeque<(NodeRef, ScopeId)>,
        scope_id: ScopeId,
        order: Order,
    ) -> FlowResult<()> {
        if scopes.is_done(scope_id) && !scopes.is_cancelled(scope_id) {
            // Another actor already drained this scope to zero without cancelling it;
            // nothing legitimate remains to attribute this order to.
            return Ok(());
        }

        let control = order.control;
        let dest_scope_id = match control {
            Control::None => scope_id,
            Control::Enter => {
                let new_scope = scopes.create_scope(scope_id, order.recall.clone());
                debug!(parent = scope_id, new_scope, "scope entered");
                new_scope
            }
            Control::Exit => {
                let parent = scopes.cancel(scope_id).unwrap_or(scope_id);
                warn!(scope_id, parent, "scope cancelled by EXIT");
                parent
            }
        };

        if !order.recruit.is_empty() {
            for downstream in &order.recruit {
                if downstream.uid() == order.uid && dest_scope_id == scope_id {
                    return Err(FlowError::CircularRecruitment(order.uid));
                }
            }
            scopes.on_recruit(dest_scope_id, order.recruit.len());
            for downstream in order.recruit {
                ready.push_back((downstream, dest_scope_id));
            }
        }

        // Only now, after `dest_scope_id` has its recruits applied, resolve whether it
        // is done. `Control::None`'s destination is `scope_id` itself — this activation
        // was one of its counted units, so finishing it is a real decrement. ENTER's
        // destination is a brand-new scope, and EXIT's is the *parent* scope; in both
        // cases this activation's own unit was never counted there, so checking must
        // not decrement it — `resolve_and_maybe_recall` only queries.
        match control {
            Control::None => self.drain_and_maybe_recall(scopes, ready, scope_id),
            Control::Enter | Control::Exit => {
                if dest_scope_id != scope_id {
                    self.resolve_and_maybe_recall(scopes, ready, dest_scope_id);
                }
            }
        }

        Ok(())
    }

    /// The FAILED/CANCELLED and node-activation-error path: the activation is done and
    /// produced no downstream, so only the decrement-and-maybe-recall half of scope
    /// bookkeeping runs.
    fn complete_control_only(
        &self,
        scopes: &mut ScopeManager,
        ready: &mut VecDeque<(NodeRef, ScopeId)>,
        scope_id: ScopeId,
    ) {
        self.drain_and_maybe_recall(scopes, ready, scope_id);
    }

    fn drain_and_maybe_recall(
        &self,
        scopes: &mut ScopeManager,
        ready: &mut VecDeque<(NodeRef, ScopeId)>,
        scope_id: ScopeId,
    ) {
        match scopes.on_complete(scope_id) {
            Drained::Recall { recall, parent_id } => {
                debug!(scope_id, parent_id, "scope drained naturally, recalling owner");
                scopes.retire(scope_id);
                ready.push_back((recall, parent_id));
            }
            Drained::NoRecall { .. } => {
                scopes.retire(scope_id);
            }
            Drained::NotYet => {}
        }
    }

    /// Non-mutating counterpart of `drain_and_maybe_recall`, for an ENTER/EXIT
    /// destination scope whose count this activation was never part of: query whether
    /// it is already done and push its recall if so, without decrementing it.
    fn resolve_and_maybe_recall(
        &self,
        scopes: &mut ScopeManager,
        ready: &mut VecDeque<(NodeRef, ScopeId)>,
        scope_id: ScopeId,
    ) {
        match scopes.resolve_recall(scope_id) {
            Drained::Recall { recall, parent_id } => {
                debug!(scope_id, parent_id, "scope already done, recalling owner");
                scopes.retire(scope_id);
                ready.push_back((recall, parent_id));
            }
            Drained::NoRecall { .. } => {
                scopes.retire(scope_id);
            }
            Drained::NotYet => {}
        }
    }
}

fn order_refs(order: &Order) -> HashSet<crate::context::Handle> {
    let mut refs = HashSet::new();
    for a in &order.args {
        refs.extend(a.refs());
    }
    for k in order.kwargs.values() {
        refs.extend(k.refs());
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::WorkerPoolConfig;
    use crate::executor::WorkerPoolExecutor;
    use crate::nodes::execute::Execute;
    use serde_json::Value;
    use std::sync::Mutex;

    fn scheduler() -> Scheduler<WorkerPoolExecutor> {
        Scheduler::new(
            Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default())),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn forward_drains_root_scope() {
        let sched = scheduler();
        let fid = sched
            .executor
            .register_worker(Arc::new(|_args: Vec<Value>, _kwargs: HashMap<String, Value>| {
                Ok(Value::from(1))
            }));
        let mut ctx = Context::new();
        let node: NodeRef = Arc::new(Execute::new(crate::context::fresh_handle(), fid, vec![], HashMap::new()));
        sched.forward(vec![node], &mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn error_hook_is_invoked_on_node_error() {
        let calls: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let calls_clone = Arc::clone(&calls);
        let sched = Scheduler::new(
            Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default())),
            SchedulerConfig::default(),
        )
        .with_error_hook(Arc::new(move |_err| {
            *calls_clone.lock().unwrap() += 1;
        }));
        let mut ctx = Context::new();
        let node: NodeRef = Arc::new(crate::nodes::branch::Branch::new(
            crate::context::fresh_handle(),
            Expression::reference(999),
            vec![],
            vec![],
        ));
        sched.forward(vec![node], &mut ctx).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
