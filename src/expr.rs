//! The expression algebra: the data-wiring language between nodes.
//!
//! An [`Expression`] is a small tree of pure value producers evaluated against a
//! [`Context`]. Evaluation never mutates the context; the only context operation an
//! expression performs is [`Cell::get`](crate::context::Cell::get) through
//! [`Context::get`](crate::context::Context::get).
//!
//! Every expression exposes [`Expression::refs`], the transitive set of handles it
//! reads. The scheduler uses this to compute the minimum [`Context::view`] to ship to a
//! worker — invariant 4 in the testable-properties list requires that shipping
//! `ctx.view(refs(e))` yields the same evaluation result as shipping the whole context,
//! so `refs` must be exact, not merely a superset.
//!
//! ```text
//! e = Union(Reference(99), Constant(42))
//! e.refs()       = {99}
//! e.eval(ctx)     -> ctx has no handle 99 -> DataNotFound is recoverable -> try next
//!                 -> Constant(42) -> 42
//! ```

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{Context, Handle};
use crate::error::{FlowError, FlowResult};
use crate::formula::{self, Formula};

/// The integer id a callable is registered under in an executor's worker registry.
pub type Fid = u64;

/// The dispatch surface [`Expression::Function`] needs: look a registered callable up
/// by id and invoke it. Implemented by the reference executor so that a single registry
/// backs both `Function` expressions and `Execute` node orders (see
/// [`crate::executor::WorkerPoolExecutor`]).
pub trait FunctionRegistry: Send + Sync {
    fn call(&self, fid: Fid, args: Vec<Value>, kwargs: HashMap<String, Value>) -> FlowResult<Value>;
}

/// A tree of pure value producers evaluated against a [`Context`].
#[derive(Clone)]
pub enum Expression {
    Constant(Value),
    Reference(Handle),
    Indexed(Handle, Box<Expression>),
    GetItem(Box<Expression>, Box<Expression>),
    Union(Vec<Expression>),
    Formula(Arc<Formula>, HashMap<String, Expression>),
    Function(Fid, Vec<Expression>, HashMap<String, Expression>),
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant(v) => write!(f, "Constant({v})"),
            Expression::Reference(h) => write!(f, "Reference({h})"),
            Expression::Indexed(h, k) => write!(f, "Indexed({h}, {k:?})"),
            Expression::GetItem(inner, k) => write!(f, "GetItem({inner:?}, {k:?})"),
            Expression::Union(es) => write!(f, "Union({es:?})"),
            Expression::Formula(src, bindings) => write!(f, "Formula({:?}, {bindings:?})", src.source()),
            Expression::Function(fid, args, kwargs) => write!(f, "Function({fid}, {args:?}, {kwargs:?})"),
        }
    }
}

impl Expression {
    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn reference(handle: Handle) -> Self {
        Expression::Reference(handle)
    }

    /// `e[k]` sugar: indexes the result of `self` by the result of `key`.
    pub fn get_item(self, key: Expression) -> Expression {
        Expression::GetItem(Box::new(self), Box::new(key))
    }

    /// `e1 | e2` sugar: union with left-bias and flattening of nested unions.
    pub fn union_with(self, other: Expression) -> Expression {
        let mut branches = match self {
            Expression::Union(existing) => existing,
            single => vec![single],
        };
        match other {
            Expression::Union(more) => branches.extend(more),
            single => branches.push(single),
        }
        Expression::Union(branches)
    }

    /// The transitive set of handles this expression reads. Pure and idempotent.
    pub fn refs(&self) -> HashSet<Handle> {
        let mut out = HashSet::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut HashSet<Handle>) {
        match self {
            Expression::Constant(_) => {}
            Expression::Reference(h) => {
                out.insert(*h);
            }
            Expression::Indexed(h, key) => {
                out.insert(*h);
                key.collect_refs(out);
            }
            Expression::GetItem(inner, key) => {
                inner.collect_refs(out);
                key.collect_refs(out);
            }
            Expression::Union(branches) => {
                for b in branches {
                    b.collect_refs(out);
                }
            }
            Expression::Formula(_, bindings) => {
                for e in bindings.values() {
                    e.collect_refs(out);
                }
            }
            Expression::Function(_, args, kwargs) => {
                for e in args {
                    e.collect_refs(out);
                }
                for e in kwargs.values() {
                    e.collect_refs(out);
                }
            }
        }
    }

    /// Evaluate against `ctx`, dispatching `Function` expressions through `registry`.
    pub fn eval(&self, ctx: &Context, registry: &dyn FunctionRegistry) -> FlowResult<Value> {
        match self {
            Expression::Constant(v) => Ok(v.clone()),
            Expression::Reference(h) => ctx.get(*h),
            Expression::Indexed(h, key_expr) => {
                let key = key_expr.eval(ctx, registry)?;
                let container = ctx.get(*h)?;
                get_item(&container, &key).map_err(|message| FlowError::DataGetItem {
                    handle: *h,
                    message,
                })
            }
            Expression::GetItem(inner, key_expr) => {
                let key = key_expr.eval(ctx, registry)?;
                let container = inner.eval(ctx, registry)?;
                get_item(&container, &key).map_err(FlowError::ExpressionFailed)
            }
            Expression::Union(branches) => eval_union(branches, ctx, registry),
            Expression::Formula(formula, bindings) => {
                let mut scope = HashMap::with_capacity(bindings.len());
                for (name, expr) in bindings {
                    scope.insert(name.clone(), expr.eval(ctx, registry)?);
                }
                formula::evaluate(formula, &scope).map_err(FlowError::ExpressionFailed)
            }
            Expression::Function(fid, args, kwargs) => {
                let mut arg_values = Vec::with_capacity(args.len());
                for e in args {
                    arg_values.push(e.eval(ctx, registry)?);
                }
                let mut kwarg_values = HashMap::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    kwarg_values.insert(name.clone(), e.eval(ctx, registry)?);
                }
                registry
                    .call(*fid, arg_values, kwarg_values)
                    .map_err(|e| FlowError::ExpressionFailed(e.to_string()))
            }
        }
    }
}

impl std::ops::BitOr for Expression {
    type Output = Expression;
    fn bitor(self, rhs: Expression) -> Expression {
        self.union_with(rhs)
    }
}

fn eval_union(
    branches: &[Expression],
    ctx: &Context,
    registry: &dyn FunctionRegistry,
) -> FlowResult<Value> {
    for branch in branches {
        match branch.eval(ctx, registry) {
            Ok(v) => return Ok(v),
            Err(e) if e.is_union_recoverable() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(FlowError::UnionFailed(branches.len()))
}

fn get_item(container: &Value, key: &Value) -> Result<Value, String> {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => map
            .get(k)
            .cloned()
            .ok_or_else(|| format!("key {k:?} not found in object")),
        (Value::Array(arr), Value::Number(n)) => {
            let idx = n
                .as_i64()
                .ok_or_else(|| format!("index {n} is not an integer"))?;
            let idx = if idx < 0 { idx + arr.len() as i64 } else { idx };
            usize::try_from(idx)
                .ok()
                .and_then(|i| arr.get(i))
                .cloned()
                .ok_or_else(|| format!("index {idx} out of bounds for array of len {}", arr.len()))
        }
        (other, key) => Err(format!("cannot index {other:?} with key {key:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRegistry;
    impl FunctionRegistry for NoopRegistry {
        fn call(&self, _fid: Fid, _args: Vec<Value>, _kwargs: HashMap<String, Value>) -> FlowResult<Value> {
            Err(FlowError::ExpressionFailed("no functions registered".into()))
        }
    }

    #[test]
    fn union_falls_back_on_missing_handle() {
        let ctx = Context::new();
        let e = Expression::reference(99).union_with(Expression::constant(42));
        assert_eq!(e.eval(&ctx, &NoopRegistry).unwrap(), Value::from(42));
    }

    #[test]
    fn union_fails_when_all_branches_fail() {
        let ctx = Context::new();
        let e = Expression::reference(1).union_with(Expression::reference(2));
        let err = e.eval(&ctx, &NoopRegistry).unwrap_err();
        assert_eq!(err.code(), "SCHEDULING_ERROR.UNION_FAILED");
    }

    #[test]
    fn refs_is_exact_for_nested_expressions() {
        let e = Expression::Indexed(1, Box::new(Expression::reference(2)))
            .get_item(Expression::reference(3));
        assert_eq!(e.refs(), [1, 2, 3].into_iter().collect());
    }

    #[test]
    fn get_item_on_array_supports_negative_index() {
        let mut ctx = Context::new();
        ctx.bind(1, crate::context::Cell::filled(serde_json::json!([10, 20, 30])));
        let e = Expression::Indexed(1, Box::new(Expression::constant(-1)));
        assert_eq!(e.eval(&ctx, &NoopRegistry).unwrap(), Value::from(30));
    }
}
