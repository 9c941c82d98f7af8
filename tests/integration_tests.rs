//! End-to-end scenarios exercising the whole stack: graph compilation, the expression
//! algebra, and the scheduler's scope bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;

use flowgraph_core::context::{fresh_handle, Context, INPUT_HANDLE};
use flowgraph_core::error::FlowError;
use flowgraph_core::executor::{WorkerPoolConfig, WorkerPoolExecutor};
use flowgraph_core::expr::Expression;
use flowgraph_core::graph::{Exposes, Graph};
use flowgraph_core::node::NodeRef;
use flowgraph_core::nodes::{Branch, Break, Execute, Join, Repeat};
use flowgraph_core::scheduler::{Scheduler, SchedulerConfig};

fn scheduler() -> (Arc<WorkerPoolExecutor>, Arc<Scheduler<WorkerPoolExecutor>>) {
    let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&executor), SchedulerConfig::default()));
    (executor, scheduler)
}

#[tokio::test]
async fn constant_fan_in() {
    let (executor, scheduler) = scheduler();
    let add_fid = executor.register(Arc::new(
        |args: Vec<Value>, _kwargs: HashMap<String, Value>| -> Result<Value, FlowError> {
            Ok(Value::from(args[0].as_f64().unwrap_or(0.0) + args[1].as_f64().unwrap_or(0.0)))
        },
    ));
    let c_uid = fresh_handle();
    let c: NodeRef = Arc::new(Execute::new(
        c_uid,
        add_fid,
        vec![Expression::constant(2), Expression::constant(3)],
        HashMap::new(),
    ));
    let graph = Graph::new(
        fresh_handle(),
        vec![c],
        Exposes::Mapping(vec![("sum".to_string(), Expression::reference(c_uid))]),
        scheduler,
    );
    let result = graph.compile().call(vec![], HashMap::new()).await.unwrap();
    assert_eq!(result, serde_json::json!({"sum": 5.0}));
}

#[tokio::test]
async fn branch_selects_true_or_false_side() {
    let (executor, scheduler) = scheduler();
    let id_fid = executor.register(Arc::new(|args: Vec<Value>, _kwargs: HashMap<String, Value>| {
        Ok::<Value, FlowError>(args.into_iter().next().unwrap_or(Value::Null))
    }));
    let t_fid = executor.register(Arc::new(|_args, _kwargs| Ok::<Value, FlowError>(Value::from("T"))));
    let f_fid = executor.register(Arc::new(|_args, _kwargs| Ok::<Value, FlowError>(Value::from("F"))));

    async fn run(
        executor: &Arc<WorkerPoolExecutor>,
        scheduler: &Arc<Scheduler<WorkerPoolExecutor>>,
        id_fid: flowgraph_core::expr::Fid,
        t_fid: flowgraph_core::expr::Fid,
        f_fid: flowgraph_core::expr::Fid,
        v: Value,
    ) -> Value {
        let _ = executor;
        let n_uid = fresh_handle();
        let n: NodeRef = Arc::new(Execute::new(
            n_uid,
            id_fid,
            vec![Expression::get_item(Expression::reference(INPUT_HANDLE), Expression::constant("v"))],
            HashMap::new(),
        ));

        let t_uid = fresh_handle();
        let t: NodeRef = Arc::new(Execute::new(t_uid, t_fid, vec![], HashMap::new()));
        let f_uid = fresh_handle();
        let f: NodeRef = Arc::new(Execute::new(f_uid, f_fid, vec![], HashMap::new()));

        let br_uid = fresh_handle();
        let br: NodeRef = Arc::new(Branch::new(br_uid, Expression::reference(n_uid), vec![t], vec![f]));

        let graph = Graph::new(
            fresh_handle(),
            vec![n, br],
            Exposes::Scalar(Expression::reference(t_uid).union_with(Expression::reference(f_uid))),
            Arc::clone(scheduler),
        );
        graph
            .compile()
            .call(vec![], [("v".to_string(), v)].into_iter().collect())
            .await
            .unwrap()
    }

    assert_eq!(run(&executor, &scheduler, id_fid, t_fid, f_fid, Value::Bool(true)).await, "T");
    assert_eq!(run(&executor, &scheduler, id_fid, t_fid, f_fid, Value::from(0)).await, "F");
}

#[tokio::test]
async fn union_falls_back_to_constant_when_reference_missing() {
    let e = Expression::reference(999).union_with(Expression::constant(42));
    struct NoopRegistry;
    impl flowgraph_core::expr::FunctionRegistry for NoopRegistry {
        fn call(
            &self,
            _fid: flowgraph_core::expr::Fid,
            _args: Vec<Value>,
            _kwargs: HashMap<String, Value>,
        ) -> Result<Value, FlowError> {
            unreachable!()
        }
    }
    let ctx = Context::new();
    assert_eq!(e.eval(&ctx, &NoopRegistry).unwrap(), Value::from(42));
}

#[tokio::test]
async fn join_barrier_fires_exactly_once_after_both_feeders() {
    let (executor, scheduler) = scheduler();
    let calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let mark_fid = executor.register(Arc::new(move |_args: Vec<Value>, _kwargs: HashMap<String, Value>| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        Ok::<Value, FlowError>(Value::Bool(true))
    }));
    let feeder_fid = executor.register(Arc::new(|_args: Vec<Value>, _kwargs: HashMap<String, Value>| {
        Ok::<Value, FlowError>(Value::Bool(true))
    }));

    let mark_done_uid = fresh_handle();
    let mark_done: NodeRef = Arc::new(Execute::new(mark_done_uid, mark_fid, vec![], HashMap::new()));
    let join: NodeRef = Arc::new(Join::new(fresh_handle(), 2, vec![mark_done]));

    let feeder_a: NodeRef = Arc::new(Execute::new(fresh_handle(), feeder_fid, vec![], HashMap::new()).recruiting(vec![Arc::clone(&join)]));
    let feeder_b: NodeRef = Arc::new(Execute::new(fresh_handle(), feeder_fid, vec![], HashMap::new()).recruiting(vec![join]));

    let mut ctx = Context::new();
    scheduler.forward(vec![feeder_a, feeder_b], &mut ctx).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn break_inside_repeat_cancels_its_iteration_and_runs_post_loop_once() {
    let (executor, scheduler) = scheduler();
    let post_loop_calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    let post_loop_calls_clone = Arc::clone(&post_loop_calls);
    let post_loop_fid = executor.register(Arc::new(move |_args: Vec<Value>, _kwargs: HashMap<String, Value>| {
        post_loop_calls_clone.fetch_add(1, Ordering::SeqCst);
        Ok::<Value, FlowError>(Value::Bool(true))
    }));
    let post_loop_uid = fresh_handle();
    let post_loop: NodeRef = Arc::new(Execute::new(post_loop_uid, post_loop_fid, vec![], HashMap::new()));

    let break_uid = fresh_handle();
    let brk: NodeRef = Arc::new(Break::new(break_uid, vec![Arc::clone(&post_loop)]));

    // Branch unconditionally takes the true side, breaking out on the very first
    // iteration; since a cancelled scope never recalls `Iter`, `post_loop` runs once
    // regardless of how many iterations `Repeat::range` would otherwise have produced.
    let branch_uid = fresh_handle();
    let branch: NodeRef = Arc::new(Branch::new(
        branch_uid,
        Expression::constant(serde_json::json!(true)),
        vec![brk],
        vec![],
    ));

    let repeat: NodeRef = Arc::new(Repeat::range(fresh_handle(), 0, 10, 1, vec![branch], vec![post_loop]));

    let mut ctx = Context::new();
    scheduler.forward(vec![repeat], &mut ctx).await.unwrap();

    assert_eq!(post_loop_calls.load(Ordering::SeqCst), 1, "post-loop downstream must run exactly once");
}
