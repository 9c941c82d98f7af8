//! Handle-addressed value store.
//!
//! A [`Context`] is a map from [`Handle`] to [`Cell`], plus a `view` operation that
//! projects out the minimum closure of cells a worker needs. Handles are process-unique
//! for the lifetime of the crate: they are minted from a single [`AtomicU64`] counter so
//! that concurrently running forwards never collide, and handle `0` is reserved for a
//! graph's input bundle.
//!
//! ```text
//!  Context
//!  ┌─────────────────────────────────────────┐
//!  │ 0 -> Cell(Arc<RwLock<Some(input)>>)      │
//!  │ 1 -> Cell(Arc<RwLock<Some(2)>>)          │  <- a.uid after Execute(a) completes
//!  │ 2 -> Cell(Arc<RwLock<None>>)             │  <- b.uid, not yet written
//!  └─────────────────────────────────────────┘
//!            │ view({0, 1})
//!            ▼
//!  Context (projection, same Cell identities)
//!  ┌───────────────────────┐
//!  │ 0 -> Cell(same Arc)   │
//!  │ 1 -> Cell(same Arc)   │
//!  └───────────────────────┘
//! ```
//!
//! `Context` itself is a plain, lock-free `HashMap`: only the scheduler's single driver
//! loop ever calls `bind` or `view`, so no internal synchronization is needed at that
//! level. The synchronization lives one layer down, inside each `Cell`, because a view
//! handed to a worker must observe a write made by the driver loop after the view was
//! taken.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{FlowError, FlowResult};

/// A process-unique integer identifying a value slot in a [`Context`].
///
/// Handle `0` is reserved for the graph input bundle; all other handles are minted by
/// [`Handle::fresh`] and are not part of the public interface of a compiled graph.
pub type Handle = u64;

/// The handle reserved for a graph's input bundle.
pub const INPUT_HANDLE: Handle = 0;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh, process-unique handle. Handle `0` is never returned here; it is
/// reserved statically for [`INPUT_HANDLE`].
pub fn fresh_handle() -> Handle {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// An opaque, write-once-per-binding holder for a value.
///
/// `get` before the first `put` fails with [`FlowError::CellEmpty`]. Cells are cheap to
/// clone (`Arc`-backed) so a [`Context::view`] can share cell identity with its parent:
/// writing through the clone in the parent is visible to readers holding the view.
#[derive(Debug, Clone)]
pub struct Cell {
    inner: Arc<RwLock<Option<Value>>>,
}

impl Cell {
    /// A cell with no value bound yet.
    pub fn empty() -> Self {
        Cell {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// A cell pre-populated with `value`.
    pub fn filled(value: Value) -> Self {
        Cell {
            inner: Arc::new(RwLock::new(Some(value))),
        }
    }

    /// Bind `value` into this cell, overwriting whatever was there.
    ///
    /// The data-model invariant that a node's result cell is written at most once per
    /// scope lifetime is enforced by callers (the scheduler never calls `put` twice on
    /// the same cell within one activation's scope); `Cell` itself does not forbid
    /// overwriting, since `release` followed by a work result is a legitimate overwrite.
    pub fn put(&self, value: Value) {
        *self.inner.write() = Some(value);
    }

    /// Read the bound value, failing if nothing has been `put` yet.
    pub fn get(&self, handle: Handle) -> FlowResult<Value> {
        self.inner
            .read()
            .clone()
            .ok_or(FlowError::CellEmpty(handle))
    }

    /// Whether a value has been bound yet.
    pub fn is_bound(&self) -> bool {
        self.inner.read().is_some()
    }
}

/// A handle-addressed value store.
///
/// `Context` is intentionally not thread-safe as a map: only the scheduler's single
/// driver loop calls [`Context::bind`] or [`Context::view`]. Views handed to workers are
/// read-only snapshots of which handles exist, though the underlying cells may still be
/// written by the driver loop concurrently with a worker reading them — that race is
/// resolved by `Cell`'s internal lock, not by `Context`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cells: HashMap<Handle, Cell>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            cells: HashMap::new(),
        }
    }

    /// Look up the cell bound to `handle`, if any.
    pub fn lookup(&self, handle: Handle) -> Option<&Cell> {
        self.cells.get(&handle)
    }

    /// Bind `cell` under `handle`, replacing any existing binding.
    pub fn bind(&mut self, handle: Handle, cell: Cell) {
        self.cells.insert(handle, cell);
    }

    /// Allocate a fresh cell, optionally pre-filled with `value`, without binding it to
    /// any handle. Used by the scheduler to wrap an executor's return value before
    /// `bind`ing it under the emitting node's `uid`.
    pub fn new_cell(&self, value: Option<Value>) -> Cell {
        match value {
            Some(v) => Cell::filled(v),
            None => Cell::empty(),
        }
    }

    /// Read the value bound to `handle`, failing with `DataNotFound` if the handle has
    /// never been bound, or if it was bound but never written.
    pub fn get(&self, handle: Handle) -> FlowResult<Value> {
        match self.lookup(handle) {
            Some(cell) => cell.get(handle).map_err(|_| FlowError::DataNotFound(handle)),
            None => Err(FlowError::DataNotFound(handle)),
        }
    }

    /// Project this context down to exactly the cells named in `handles`, sharing cell
    /// identity with `self` so writes to the original are visible through the view.
    pub fn view(&self, handles: &HashSet<Handle>) -> Context {
        let cells = handles
            .iter()
            .filter_map(|h| self.cells.get(h).map(|c| (*h, c.clone())))
            .collect();
        Context { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &Cell)> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_get_before_put_fails() {
        let cell = Cell::empty();
        let err = cell.get(7).unwrap_err();
        assert_eq!(err.code(), "SCHEDULING_ERROR.DATA_NOTFOUND");
    }

    #[test]
    fn view_shares_cell_identity() {
        let mut ctx = Context::new();
        let cell = Cell::empty();
        ctx.bind(1, cell.clone());
        let view = ctx.view(&[1].into_iter().collect());
        cell.put(Value::from(42));
        assert_eq!(view.get(1).unwrap(), Value::from(42));
    }

    #[test]
    fn view_excludes_unlisted_handles() {
        let mut ctx = Context::new();
        ctx.bind(1, Cell::filled(Value::from(1)));
        ctx.bind(2, Cell::filled(Value::from(2)));
        let view = ctx.view(&[1].into_iter().collect());
        assert!(view.lookup(2).is_none());
        assert_eq!(view.get(1).unwrap(), Value::from(1));
    }

    #[test]
    fn fresh_handle_never_returns_zero_and_is_monotonic() {
        let a = fresh_handle();
        let b = fresh_handle();
        assert_ne!(a, INPUT_HANDLE);
        assert_ne!(b, INPUT_HANDLE);
        assert!(b > a);
    }
}
