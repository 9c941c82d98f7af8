//! Power iteration over a 50x50 symmetric positive-definite matrix, looping through
//! `Repeat`/`Iter` and terminating early via `Branch` + `Break` once the eigenvalue
//! estimate stops moving.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use flowgraph_core::context::{fresh_handle, Context, INPUT_HANDLE};
use flowgraph_core::error::FlowError;
use flowgraph_core::executor::{WorkerPoolConfig, WorkerPoolExecutor};
use flowgraph_core::expr::Expression;
use flowgraph_core::node::NodeRef;
use flowgraph_core::nodes::{Branch, Break, Execute, Repeat};
use flowgraph_core::scheduler::{Scheduler, SchedulerConfig};

const N: usize = 50;

fn random_spd_matrix(seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = vec![vec![0.0; N]; N];
    for row in m.iter_mut() {
        for v in row.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
    }
    // A = M^T M + I is symmetric positive-definite.
    let mut a = vec![vec![0.0; N]; N];
    for i in 0..N {
        for j in 0..N {
            let mut sum = 0.0;
            for k in 0..N {
                sum += m[k][i] * m[k][j];
            }
            a[i][j] = sum + if i == j { 1.0 } else { 0.0 };
        }
    }
    a
}

fn matvec(a: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    a.iter().map(|row| row.iter().zip(x).map(|(aij, xj)| aij * xj).sum()).collect()
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn vec_to_value(v: &[f64]) -> Value {
    Value::Array(v.iter().map(|x| Value::from(*x)).collect())
}

fn value_to_vec(v: &Value) -> Vec<f64> {
    v.as_array()
        .expect("expected an array")
        .iter()
        .map(|x| x.as_f64().unwrap_or(0.0))
        .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let a = Arc::new(random_spd_matrix(42));

    let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&executor), SchedulerConfig::default()));

    // `step_uid` doubles as the loop-carried state handle: every iteration reads the
    // previous iteration's {x, lambda, delta} from this same cell and overwrites it with
    // the new one, since the scheduler always binds an Execute order's result under its
    // own uid.
    let step_uid = fresh_handle();

    let init_fid = {
        let a = Arc::clone(&a);
        executor.register(Arc::new(move |_args: Vec<Value>, _kwargs: HashMap<String, Value>| {
            let mut x0 = vec![1.0 / (N as f64).sqrt(); N];
            let norm0 = norm(&x0);
            for v in x0.iter_mut() {
                *v /= norm0;
            }
            let lambda0 = dot(&x0, &matvec(&a, &x0));
            Ok::<Value, FlowError>(serde_json::json!({"x": vec_to_value(&x0), "lambda": lambda0, "delta": f64::INFINITY}))
        }))
    };

    let step_fid = {
        let a = Arc::clone(&a);
        executor.register(Arc::new(move |args: Vec<Value>, _kwargs: HashMap<String, Value>| {
            let x = value_to_vec(&args[0]);
            let lambda_prev = args[1].as_f64().unwrap_or(0.0);
            let y = matvec(&a, &x);
            let y_norm = norm(&y);
            let x_new: Vec<f64> = y.iter().map(|v| v / y_norm).collect();
            let lambda_new = dot(&x_new, &matvec(&a, &x_new));
            let delta = (lambda_new - lambda_prev).abs();
            Ok::<Value, FlowError>(serde_json::json!({"x": vec_to_value(&x_new), "lambda": lambda_new, "delta": delta}))
        }))
    };

    let init_uid = fresh_handle();
    let init: NodeRef = Arc::new(Execute::new(init_uid, init_fid, vec![], HashMap::new()));

    let mark_done_uid = fresh_handle();
    let mark_done: NodeRef = Arc::new(Execute::new(
        mark_done_uid,
        executor.register(Arc::new(|_args, _kwargs| Ok::<Value, FlowError>(Value::Bool(true)))),
        vec![],
        HashMap::new(),
    ));

    let break_uid = fresh_handle();
    let brk: NodeRef = Arc::new(Break::new(break_uid, vec![Arc::clone(&mark_done)]));

    let branch_uid = fresh_handle();
    let branch_condition = Expression::Formula(
        Arc::new(flowgraph_core::formula::Formula::parse("delta < 0.001").unwrap()),
        [(
            "delta".to_string(),
            Expression::get_item(Expression::reference(step_uid), Expression::constant("delta")),
        )]
        .into_iter()
        .collect(),
    );
    let branch: NodeRef = Arc::new(Branch::new(branch_uid, branch_condition, vec![brk], vec![]));

    let step: NodeRef = Arc::new(
        Execute::new(
            step_uid,
            step_fid,
            vec![
                Expression::get_item(Expression::reference(step_uid), Expression::constant("x")),
                Expression::get_item(Expression::reference(step_uid), Expression::constant("lambda")),
            ],
            HashMap::new(),
        )
        .recruiting(vec![branch]),
    );

    let repeat_uid = fresh_handle();
    let repeat: NodeRef = Arc::new(Repeat::range(repeat_uid, 0, 100, 1, vec![step], vec![mark_done]));

    let mut ctx = Context::new();
    ctx.bind(INPUT_HANDLE, ctx.new_cell(Some(Value::Object(Default::default()))));

    scheduler.forward(vec![init], &mut ctx).await.expect("init failed");
    let init_result = ctx.get(init_uid).expect("init produced no state");
    ctx.bind(step_uid, ctx.new_cell(Some(init_result)));

    scheduler.forward(vec![repeat], &mut ctx).await.expect("power iteration failed");

    let final_state = ctx.get(step_uid).expect("power iteration produced no final state");
    println!("{}", serde_json::to_string_pretty(&final_state).unwrap());
}
