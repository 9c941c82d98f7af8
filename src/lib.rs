//! # flowgraph-core
//!
//! A concurrent **dataflow graph execution engine**: wire computation nodes into a
//! directed graph with control-flow constructs (branching, bounded looping, loop-break,
//! join/barrier), optionally group subgraphs as reusable nodes, then hand the graph to
//! a scheduler that drives nodes to completion on a pool of workers, respecting data
//! dependencies, loop scopes, and cancellation.
//!
//! ## Core concepts
//!
//! - **[`Context`](context::Context)** — a handle-addressed value store. Node results
//!   are bound into it; [`Expression`](expr::Expression)s read from it.
//! - **[`Expression`](expr::Expression)** — the data-wiring language between nodes:
//!   constants, references, indexing, unions with fallback, restricted formulas, and
//!   registered function calls.
//! - **[`Node`](node::Node)** — anything that, given a context, produces one
//!   [`Order`](order::Order) describing what work to run, what control-flow to apply,
//!   and who to recruit next. The concrete library lives in [`nodes`]: `Execute`,
//!   `Branch`, `Repeat`, `Break`, `Join`, `Group`.
//! - **[`ScopeManager`](scope::ScopeManager)** — tracks how many activations are
//!   outstanding per nested loop/branch scope and decides when to recall a scope's owner.
//! - **[`Scheduler`](scheduler::Scheduler)** — the single-threaded driver loop: pulls
//!   ready activations, submits work to a [`WorkSubmitter`](scheduler::WorkSubmitter),
//!   and applies scope bookkeeping as results arrive.
//! - **[`WorkerPoolExecutor`](executor::WorkerPoolExecutor)** — the reference executor:
//!   a bounded `tokio` worker pool satisfying the `WorkSubmitter` contract.
//! - **[`Graph`](graph::Graph)** — bundles starter nodes and exposed expressions into a
//!   compiled `(args, kwargs) -> value` callable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Graph::compile()                                                     │
//! │   writes (args, kwargs) into Context[INPUT_HANDLE]                   │
//! │   Scheduler::forward(starters, &mut ctx)                             │
//! │     ┌──────────────┐   activate    ┌───────────────────────────┐     │
//! │     │ ready queue   │ ───────────▶ │ Node::activate -> Order   │     │
//! │     └──────────────┘               └───────────────────────────┘     │
//! │            ▲                                  │ source? ctx.view()   │
//! │            │ recruit / recall                 ▼                     │
//! │     ┌──────────────┐               ┌───────────────────────────┐     │
//! │     │ ScopeManager  │ ◀──────────  │ WorkerPoolExecutor::submit │     │
//! │     └──────────────┘   event       └───────────────────────────┘     │
//! │   evaluates `exposes` out of the final Context                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use serde_json::Value;
//!
//! use flowgraph_core::context::fresh_handle;
//! use flowgraph_core::error::FlowResult;
//! use flowgraph_core::executor::{WorkerPoolConfig, WorkerPoolExecutor};
//! use flowgraph_core::expr::Expression;
//! use flowgraph_core::graph::{Exposes, Graph};
//! use flowgraph_core::node::NodeRef;
//! use flowgraph_core::nodes::Execute;
//! use flowgraph_core::scheduler::{Scheduler, SchedulerConfig};
//!
//! # async fn run() -> FlowResult<()> {
//! let executor = Arc::new(WorkerPoolExecutor::new(WorkerPoolConfig::default()));
//! let add_fid = executor.register(Arc::new(
//!     |args: Vec<Value>, _kwargs: HashMap<String, Value>| -> FlowResult<Value> {
//!         Ok(Value::from(args[0].as_f64().unwrap_or(0.0) + args[1].as_f64().unwrap_or(0.0)))
//!     },
//! ));
//! let scheduler = Arc::new(Scheduler::new(executor, SchedulerConfig::default()));
//!
//! let sum_uid = fresh_handle();
//! let sum: NodeRef = Arc::new(Execute::new(
//!     sum_uid,
//!     add_fid,
//!     vec![Expression::constant(2), Expression::constant(3)],
//!     HashMap::new(),
//! ));
//!
//! let graph = Graph::new(
//!     fresh_handle(),
//!     vec![sum],
//!     Exposes::Mapping(vec![("sum".to_string(), Expression::reference(sum_uid))]),
//!     scheduler,
//! );
//! let result = graph.compile().call(vec![], HashMap::new()).await?;
//! assert_eq!(result, serde_json::json!({"sum": 5.0}));
//! # Ok(())
//! # }
//! ```
//!
//! ## What this crate does not do
//!
//! Distributed execution, persistent/resumable graphs, priority scheduling, and
//! construction-time cycle detection are explicit non-goals: cycles in node
//! recruitment surface as non-termination or as a `CIRCULAR_RECRUITMENT` error at run
//! time, never as a build-time check. The surface builder/DSL used to construct graphs
//! ergonomically, decorators that wrap plain functions into nodes, graph serialization,
//! and any telemetry/debugger UI are out of scope for this core — they are expected to
//! be layered on top of the types here.

pub mod context;
pub mod error;
pub mod executor;
pub mod expr;
pub mod formula;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod order;
pub mod scheduler;
pub mod scope;

pub use context::{Cell, Context, Handle, INPUT_HANDLE};
pub use error::{FlowError, FlowResult};
pub use executor::{ExecutorEvent, TaskStatus, Worker, WorkerPoolConfig, WorkerPoolExecutor};
pub use expr::{Expression, Fid, FunctionRegistry};
pub use graph::{CompiledGraph, Exposes, Graph};
pub use node::{Node, NodeRef};
pub use order::{Control, Order, WorkSource};
pub use scheduler::{Scheduler, SchedulerConfig, WorkSubmitter};
pub use scope::{ScopeId, ScopeManager};
