//! GC root tracking
//!
//! Roots are starting points for GC traversal:
//! - Persistent roots (globals, anything the embedder pins)
//! - Scope roots (values live for the current native call)
//!
//! Strong global handles are roots too, but they are tracked by the handle
//! table rather than here.

use super::value::Value;

/// Root set for garbage collection
///
/// The root set contains all values that are directly accessible
/// and should not be collected, even if no other objects reference them.
#[derive(Debug)]
pub struct RootSet {
    /// Persistent roots, removed explicitly
    persistent_roots: Vec<Value>,

    /// Scope roots, cleared in bulk
    scope_roots: Vec<Value>,
}

impl RootSet {
    /// Create a new root set
    pub fn new() -> Self {
        Self {
            persistent_roots: Vec::new(),
            scope_roots: Vec::new(),
        }
    }

    /// Add a persistent root
    pub fn add_persistent_root(&mut self, value: Value) {
        self.persistent_roots.push(value);
    }

    /// Remove one occurrence of a persistent root
    ///
    /// Returns false if the value was not rooted.
    pub fn remove_persistent_root(&mut self, value: Value) -> bool {
        match self.persistent_roots.iter().position(|v| *v == value) {
            Some(pos) => {
                self.persistent_roots.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Add a scope root
    pub fn add_scope_root(&mut self, value: Value) {
        self.scope_roots.push(value);
    }

    /// Clear all scope roots
    pub fn clear_scope_roots(&mut self) {
        self.scope_roots.clear();
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.persistent_roots
            .iter()
            .chain(self.scope_roots.iter())
            .copied()
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.persistent_roots.len() + self.scope_roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RootSet {
    fn default() -> Self {
        Self::new()
    }
}
