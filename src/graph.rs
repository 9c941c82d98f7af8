//! `Graph`: bundles starters plus exposed expressions into a callable `(kwargs) ->
//! outputs`.
//!
//! Compiling a graph (`Graph::compile`, mirroring the original's `lambdify`) returns a
//! [`CompiledGraph`]: a handle that writes a forward's positional/keyword input
//! arguments into a fresh [`Context`] under [`INPUT_HANDLE`], runs the configured
//! scheduler over the graph's starters, then evaluates the exposed expressions out of
//! the resulting context. A compiled graph can also be wrapped as a [`Group`] node via
//! [`CompiledGraph::group`], recursing the same machinery one level deeper.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, Handle, INPUT_HANDLE};
use crate::error::{FlowError, FlowResult};
use crate::expr::Expression;
use crate::node::NodeRef;
use crate::nodes::group::{Group, GraphCallable};
use crate::scheduler::{Scheduler, WorkSubmitter};

/// The shape exposed outputs take when a compiled graph returns: a single value, a
/// fixed-order tuple, or a name-keyed mapping — governing the shape of the value
/// `CompiledGraph::call` produces.
#[derive(Clone)]
pub enum Exposes {
    Scalar(Expression),
    Tuple(Vec<Expression>),
    Mapping(Vec<(String, Expression)>),
}

/// A graph has `(starters, exposes, uid)`. `uid` identifies this graph when it is
/// wrapped as a `Group` node elsewhere.
#[derive(Clone)]
pub struct Graph<E: WorkSubmitter> {
    uid: Handle,
    starters: Vec<NodeRef>,
    exposes: Exposes,
    scheduler: Arc<Scheduler<E>>,
}

impl<E: WorkSubmitter + 'static> Graph<E> {
    pub fn new(uid: Handle, starters: Vec<NodeRef>, exposes: Exposes, scheduler: Arc<Scheduler<E>>) -> Self {
        Graph {
            uid,
            starters,
            exposes,
            scheduler,
        }
    }

    pub fn uid(&self) -> Handle {
        self.uid
    }

    /// Produce the callable `(args, kwargs) -> outputs` this graph compiles to.
    pub fn compile(&self) -> CompiledGraph<E> {
        CompiledGraph {
            starters: self.starters.clone(),
            exposes: self.exposes.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

/// The callable a [`Graph`] compiles to.
pub struct CompiledGraph<E: WorkSubmitter> {
    starters: Vec<NodeRef>,
    exposes: Exposes,
    scheduler: Arc<Scheduler<E>>,
}

impl<E: WorkSubmitter + 'static> CompiledGraph<E> {
    /// Write `args`/`kwargs` into a fresh context's input bundle, run a forward over
    /// the graph's starters, then evaluate and return the exposed expressions.
    pub async fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
        let mut ctx = Context::new();
        let input = build_input_bundle(args, kwargs);
        ctx.bind(INPUT_HANDLE, ctx.new_cell(Some(input)));

        self.scheduler.forward(self.starters.clone(), &mut ctx).await?;

        let registry = self.scheduler_registry();
        match &self.exposes {
            Exposes::Scalar(e) => e
                .eval(&ctx, registry)
                .map_err(|err| FlowError::exposed_not_found("<scalar>", err)),
            Exposes::Tuple(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for (i, e) in exprs.iter().enumerate() {
                    let v = e
                        .eval(&ctx, registry)
                        .map_err(|err| FlowError::exposed_not_found(i.to_string(), err))?;
                    values.push(v);
                }
                Ok(Value::Array(values))
            }
            Exposes::Mapping(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (key, e) in fields {
                    let v = e
                        .eval(&ctx, registry)
                        .map_err(|err| FlowError::exposed_not_found(key.clone(), err))?;
                    map.insert(key.clone(), v);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn scheduler_registry(&self) -> &dyn crate::expr::FunctionRegistry {
        // The scheduler's executor owns the worker registry; exposed expressions may
        // themselves be `Function` expressions that need it.
        self.scheduler.executor_registry()
    }

    /// Wrap this compiled graph as a `Group` node: activating it calls this graph with
    /// the bound `args`/`kwargs`, binds the result under `uid`, and recruits
    /// `downstreams`.
    pub fn group(
        self: Arc<Self>,
        uid: Handle,
        args: Vec<Expression>,
        kwargs: HashMap<String, Expression>,
        downstreams: Vec<NodeRef>,
    ) -> Group
    where
        Self: 'static,
    {
        Group::new(uid, self as Arc<dyn GraphCallable>, args, kwargs, downstreams)
    }
}

#[async_trait]
impl<E: WorkSubmitter + 'static> GraphCallable for CompiledGraph<E> {
    async fn call(&self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value> {
        CompiledGraph::call(self, args, kwargs).await
    }
}

fn build_input_bundle(args: Vec<Value>, kwargs: HashMap<String, Value>) -> Value {
    let mut map = serde_json::Map::with_capacity(args.len() + kwargs.len());
    for (i, v) in args.into_iter().enumerate() {
        map.insert(i.to_string(), v);
    }
    for (k, v) in kwargs {
        map.insert(k, v);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{WorkerPoolConfig, WorkerPoolExecutor};
    use crate::nodes::execute::Execute;
    use crate::scheduler::SchedulerConfig;

    #[tokio::test]
    async fn constant_fan_in_exposes_sum() {
        let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
        let fid = executor.register(Arc::new(|args: Vec<Value>, kwargs: HashMap<String, Value>| {
            let x = args[0].as_f64().unwrap_or(0.0);
            let y = args[1].as_f64().unwrap_or(0.0);
            let _ = kwargs;
            Ok::<Value, FlowError>(Value::from(x + y))
        }));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&executor), SchedulerConfig::default()));

        let a = Expression::constant(2);
        let b = Expression::constant(3);
        let c_uid = crate::context::fresh_handle();
        let c: NodeRef = Arc::new(Execute::new(c_uid, fid, vec![a, b], HashMap::new()));

        let graph = Graph::new(
            crate::context::fresh_handle(),
            vec![c],
            Exposes::Mapping(vec![("sum".to_string(), Expression::reference(c_uid))]),
            scheduler,
        );
        let compiled = graph.compile();
        let result = compiled.call(vec![], HashMap::new()).await.unwrap();
        assert_eq!(result, serde_json::json!({"sum": 5.0}));
    }
}
