//! Two constants feed one `Execute` node; the graph exposes the sum.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use flowgraph_core::context::fresh_handle;
use flowgraph_core::executor::{WorkerPoolConfig, WorkerPoolExecutor};
use flowgraph_core::expr::Expression;
use flowgraph_core::graph::{Exposes, Graph};
use flowgraph_core::node::NodeRef;
use flowgraph_core::nodes::Execute;
use flowgraph_core::scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
    let add_fid = executor.register(Arc::new(
        |args: Vec<Value>, _kwargs: HashMap<String, Value>| {
            let x = args[0].as_f64().unwrap_or(0.0);
            let y = args[1].as_f64().unwrap_or(0.0);
            Ok::<Value, flowgraph_core::error::FlowError>(Value::from(x + y))
        },
    ));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&executor), SchedulerConfig::default()));

    let sum_uid = fresh_handle();
    let sum: NodeRef = Arc::new(Execute::new(
        sum_uid,
        add_fid,
        vec![Expression::constant(2), Expression::constant(3)],
        HashMap::new(),
    ));

    let graph = Graph::new(
        fresh_handle(),
        vec![sum],
        Exposes::Mapping(vec![("sum".to_string(), Expression::reference(sum_uid))]),
        scheduler,
    );

    let result = graph.compile().call(vec![], HashMap::new()).await.expect("forward failed");
    println!("{}", serde_json::to_string_pretty(&result).unwrap());
}
