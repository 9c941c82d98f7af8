//! Scope accounting: a flat map from scope id to `{count, recall, parent_id, cancelled}`.
//!
//! A scope is an accounting bracket around a set of activations. The root scope wraps a
//! graph's starters; every `ENTER` order opens a fresh child scope. A scope "drains"
//! when its activation count reaches zero; whether that drain recalls the scope's owner
//! depends on whether the scope was cancelled (`EXIT`) along the way — see the policy
//! note on [`ScopeManager::on_complete`].
//!
//! Scopes never hold a stack per activation: each activation simply carries the id of
//! the scope it belongs to, and the manager resolves `parent_id` chains by following the
//! flat map, per the Design Notes' "scope chains as a stack" guidance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::node::NodeRef;

pub type ScopeId = u64;

/// The scope that wraps a graph's starter nodes. Always id `0`, created once per
/// forward and never cancelled or recalled.
pub const ROOT_SCOPE: ScopeId = 0;

struct Scope {
    count: i64,
    recall: Option<NodeRef>,
    parent_id: Option<ScopeId>,
    cancelled: bool,
}

/// What happened when a scope finished draining, used by the scheduler to decide
/// whether to push a recall.
pub enum Drained {
    /// The scope is not yet done (count > 0 and not cancelled).
    NotYet,
    /// The scope drained naturally and has a recall to re-enqueue, in `parent_id`.
    Recall { recall: NodeRef, parent_id: ScopeId },
    /// The scope drained (naturally with no recall, or by cancellation); nothing to
    /// re-enqueue, but the parent's count was decremented once.
    NoRecall { parent_id: Option<ScopeId> },
}

/// Tracks active node counts per nested scope and routes recall/exit per the policy in
/// [`on_complete`](ScopeManager::on_complete).
pub struct ScopeManager {
    scopes: HashMap<ScopeId, Scope>,
    next_id: AtomicU64,
}

impl ScopeManager {
    /// A fresh manager with only the root scope, seeded with `starter_count`
    /// activations (one per graph starter).
    pub fn new(starter_count: usize) -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(
            ROOT_SCOPE,
            Scope {
                count: starter_count as i64,
                recall: None,
                parent_id: None,
                cancelled: false,
            },
        );
        ScopeManager {
            scopes,
            next_id: AtomicU64::new(ROOT_SCOPE + 1),
        }
    }

    pub fn create_scope(&mut self, parent_id: ScopeId, recall: Option<NodeRef>) -> ScopeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scopes.insert(
            id,
            Scope {
                count: 0,
                recall,
                parent_id: Some(parent_id),
                cancelled: false,
            },
        );
        id
    }

    pub fn on_recruit(&mut self, scope_id: ScopeId, n: usize) {
        if let Some(scope) = self.scopes.get_mut(&scope_id) {
            scope.count += n as i64;
        }
    }

    /// Mark `scope_id` cancelled, returning its parent (for recruit redirection). A
    /// cancelled scope never issues a recall, even once it later drains to zero.
    pub fn cancel(&mut self, scope_id: ScopeId) -> Option<ScopeId> {
        let parent = self.scopes.get(&scope_id).and_then(|s| s.parent_id);
        if let Some(scope) = self.scopes.get_mut(&scope_id) {
            scope.cancelled = true;
        }
        parent
    }

    pub fn is_done(&self, scope_id: ScopeId) -> bool {
        self.scopes
            .get(&scope_id)
            .map(|s| s.count < 1 || s.cancelled)
            .unwrap_or(true)
    }

    pub fn is_cancelled(&self, scope_id: ScopeId) -> bool {
        self.scopes.get(&scope_id).map(|s| s.cancelled).unwrap_or(false)
    }

    pub fn parent_of(&self, scope_id: ScopeId) -> Option<ScopeId> {
        self.scopes.get(&scope_id).and_then(|s| s.parent_id)
    }

    /// One activation belonging to `scope_id` finished with `control == NONE`: decrement
    /// its count and resolve whether this drains the scope.
    ///
    /// Policy (§4.5): a cancelled scope's remaining decrements still update `count` but
    /// never trigger the recall. When a cancelled scope's count reaches zero it still
    /// decrements its parent's count exactly once — the cancelling order's own
    /// accounting — but issues no recall.
    pub fn on_complete(&mut self, scope_id: ScopeId) -> Drained {
        let (done, cancelled, parent_id, recall) = {
            let scope = match self.scopes.get_mut(&scope_id) {
                Some(s) => s,
                None => return Drained::NoRecall { parent_id: None },
            };
            scope.count -= 1;
            (scope.count < 1, scope.cancelled, scope.parent_id, scope.recall.clone())
        };
        if !done {
            return Drained::NotYet;
        }
        if cancelled {
            if let Some(parent_id) = parent_id {
                self.on_complete_silent(parent_id);
            }
            return Drained::NoRecall { parent_id };
        }
        match (recall, parent_id) {
            (Some(recall), Some(parent_id)) => Drained::Recall { recall, parent_id },
            _ => Drained::NoRecall { parent_id },
        }
    }

    /// Non-mutating counterpart to `on_complete`, for a scope whose count the caller's
    /// own completing activation was never part of — an ENTER's freshly created child
    /// scope, or an EXIT's parent scope. Queries whether the scope is already done and,
    /// if so, resolves its recall exactly as `on_complete` would, but never decrements
    /// `count`: the activation asking the question is not one of this scope's units.
    pub fn resolve_recall(&self, scope_id: ScopeId) -> Drained {
        let scope = match self.scopes.get(&scope_id) {
            Some(s) => s,
            None => return Drained::NoRecall { parent_id: None },
        };
        if scope.count >= 1 && !scope.cancelled {
            return Drained::NotYet;
        }
        if scope.cancelled {
            return Drained::NoRecall { parent_id: scope.parent_id };
        }
        match (scope.recall.clone(), scope.parent_id) {
            (Some(recall), Some(parent_id)) => Drained::Recall { recall, parent_id },
            _ => Drained::NoRecall { parent_id: scope.parent_id },
        }
    }

    /// Decrement a parent's count as the single implicit decrement a cancelled child
    /// scope contributes when it finishes draining, without re-triggering cancellation
    /// propagation recursively beyond that one step.
    fn on_complete_silent(&mut self, scope_id: ScopeId) {
        if let Some(scope) = self.scopes.get_mut(&scope_id) {
            scope.count -= 1;
        }
    }

    /// Remove a scope's bookkeeping once it is fully drained and has been handled. Not
    /// required for correctness (stale entries are inert) but keeps the map from
    /// growing unboundedly across long-running forwards with many loop iterations.
    pub fn retire(&mut self, scope_id: ScopeId) {
        if scope_id != ROOT_SCOPE {
            self.scopes.remove(&scope_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_scope_starts_with_starter_count() {
        let mgr = ScopeManager::new(3);
        assert!(!mgr.is_done(ROOT_SCOPE));
    }

    #[test]
    fn natural_drain_without_recall() {
        let mut mgr = ScopeManager::new(1);
        match mgr.on_complete(ROOT_SCOPE) {
            Drained::NoRecall { parent_id } => assert_eq!(parent_id, None),
            _ => panic!("expected NoRecall"),
        }
    }

    #[test]
    fn cancelled_scope_never_recalls() {
        let mut mgr = ScopeManager::new(1);
        let child = mgr.create_scope(ROOT_SCOPE, None);
        mgr.on_recruit(child, 1);
        mgr.cancel(child);
        match mgr.on_complete(child) {
            Drained::NoRecall { parent_id } => assert_eq!(parent_id, Some(ROOT_SCOPE)),
            _ => panic!("cancelled scope must never recall"),
        }
        assert!(mgr.is_done(ROOT_SCOPE));
    }
}
