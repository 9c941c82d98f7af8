//! Benchmarks the scheduler's throughput over a parametrised fan-out graph: one source
//! node recruiting `width` independent `Execute` leaves into the same scope.

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Value;
use tokio::runtime::Runtime;

use flowgraph_core::context::{fresh_handle, Context};
use flowgraph_core::error::FlowError;
use flowgraph_core::executor::{WorkerPoolConfig, WorkerPoolExecutor};
use flowgraph_core::expr::Expression;
use flowgraph_core::node::NodeRef;
use flowgraph_core::nodes::Execute;
use flowgraph_core::scheduler::{Scheduler, SchedulerConfig};

fn build_fan_out(width: usize, fid: flowgraph_core::expr::Fid) -> NodeRef {
    let leaves: Vec<NodeRef> = (0..width)
        .map(|_| -> NodeRef { Arc::new(Execute::new(fresh_handle(), fid, vec![Expression::constant(1)], HashMap::new())) })
        .collect();
    Arc::new(Execute::new(fresh_handle(), fid, vec![Expression::constant(0)], HashMap::new()).recruiting(leaves))
}

fn fan_out_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_fan_out");

    for width in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.to_async(&rt).iter(|| async {
                let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
                let fid = executor.register(Arc::new(
                    |args: Vec<Value>, _kwargs: HashMap<String, Value>| -> Result<Value, FlowError> {
                        Ok(args.into_iter().next().unwrap_or(Value::Null))
                    },
                ));
                let scheduler = Scheduler::new(Arc::clone(&executor), SchedulerConfig::default());
                let root = build_fan_out(width, fid);
                let mut ctx = Context::new();
                scheduler.forward(vec![root], &mut ctx).await.unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, fan_out_benchmark);
criterion_main!(benches);
