//! Lexical environments: an arena of scopes with barrier semantics.
//!
//! Scopes live in a flat arena indexed by [`ScopeId`] and chain to their
//! parents by index, so closure environments stay valid for the lifetime of
//! the execution context and no reference cycles can form. A scope created
//! with `barrier = true` intercepts writes that would otherwise land in an
//! outer scope; this is how concurrent branches stay isolated until their
//! writes are joined.

use std::collections::HashMap;

use crate::interpreter::value::Value;
use crate::runtime::error::ExecError;

/// Index of a scope in a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ScopeId(usize);

/// One lexical scope.
#[derive(Debug, Clone)]
struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<ScopeId>,
    barrier: bool,
}

/// Arena holding every scope created during one execution.
///
/// Cloning snapshots every scope; forked branches run against their own
/// clone, so sibling writes stay invisible until the join.
#[derive(Debug, Clone, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    /// Arena with a single root scope; returns the arena and the root id.
    pub fn new() -> (Self, ScopeId) {
        let mut arena = Self::default();
        let root = arena.push(None, false);
        (arena, root)
    }

    fn push(&mut self, parent: Option<ScopeId>, barrier: bool) -> ScopeId {
        self.scopes.push(Scope {
            vars: HashMap::new(),
            parent,
            barrier,
        });
        ScopeId(self.scopes.len() - 1)
    }

    /// New child scope, e.g. for a function call frame.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        self.push(Some(parent), false)
    }

    /// New child scope that intercepts outer writes, used at branch forks.
    pub fn barrier_child(&mut self, parent: ScopeId) -> ScopeId {
        self.push(Some(parent), true)
    }

    /// Read a name, walking the parent chain.
    pub fn read(&self, scope: ScopeId, name: &str) -> Result<Value, ExecError> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(value) = scope.vars.get(name) {
                return Ok(value.clone());
            }
            current = scope.parent;
        }
        Err(ExecError::name_not_found(name))
    }

    /// Write a name.
    ///
    /// If the owning scope is reachable without crossing a barrier, the
    /// owning scope is updated. If the owner lies beyond a barrier, the
    /// write lands in the nearest barrier scope instead. An unbound name
    /// binds in the innermost scope.
    pub fn write(&mut self, scope: ScopeId, name: &str, value: Value) {
        let mut current = Some(scope);
        let mut nearest_barrier = None;
        while let Some(id) = current {
            let entry = &self.scopes[id.0];
            if entry.vars.contains_key(name) {
                let destination = nearest_barrier.unwrap_or(id);
                self.scopes[destination.0]
                    .vars
                    .insert(name.to_string(), value);
                return;
            }
            if entry.barrier && nearest_barrier.is_none() {
                nearest_barrier = Some(id);
            }
            current = entry.parent;
        }
        self.scopes[scope.0].vars.insert(name.to_string(), value);
    }

    /// Bind a name directly in the given scope, shadowing any outer binding.
    /// Used for parameters and loop variables.
    pub fn bind_local(&mut self, scope: ScopeId, name: &str, value: Value) {
        self.scopes[scope.0].vars.insert(name.to_string(), value);
    }

    /// Snapshot the bindings stored directly in one scope. For a barrier
    /// scope this is the branch's write set.
    pub fn local_bindings(&self, scope: ScopeId) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self.scopes[scope.0]
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }
}
