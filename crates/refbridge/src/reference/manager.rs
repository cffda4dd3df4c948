//! Runtime-owned reference registry
//!
//! An intrusive doubly-linked list threaded through the arena: each
//! reference carries its own `prev`/`next` slot indices, so register and
//! unregister are O(1) and teardown can repeatedly destroy the first node
//! without ever walking freed entries.

use super::arena::{RefKey, ReferenceArena};

/// List links stored inside each reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ManagerLinks {
    prev: Option<u32>,
    next: Option<u32>,
    linked: bool,
}

/// Registry of runtime-owned references for one engine
#[derive(Debug, Default)]
pub(crate) struct ReferenceManager {
    head: Option<u32>,
    len: usize,
}

impl ReferenceManager {
    /// Push a reference onto the front of the list
    pub(crate) fn register(&mut self, arena: &mut ReferenceArena, key: RefKey) {
        let head = self.head;
        let Some(reference) = arena.get_mut(key) else {
            return;
        };
        if reference.links.linked {
            return;
        }
        reference.links = ManagerLinks {
            prev: None,
            next: head,
            linked: true,
        };
        if let Some(old_head) = head.and_then(|i| arena.get_at_mut(i)) {
            old_head.links.prev = Some(key.index);
        }
        self.head = Some(key.index);
        self.len += 1;
    }

    /// Unlink a reference; returns false if it was not registered
    pub(crate) fn unregister(&mut self, arena: &mut ReferenceArena, key: RefKey) -> bool {
        let Some(reference) = arena.get_mut(key) else {
            return false;
        };
        if !reference.links.linked {
            return false;
        }
        let ManagerLinks { prev, next, .. } = std::mem::take(&mut reference.links);

        match prev.and_then(|i| arena.get_at_mut(i)) {
            Some(p) => p.links.next = next,
            None => self.head = next,
        }
        if let Some(n) = next.and_then(|i| arena.get_at_mut(i)) {
            n.links.prev = prev;
        }
        self.len -= 1;
        true
    }

    /// First registered reference, if any
    pub(crate) fn first(&self, arena: &ReferenceArena) -> Option<RefKey> {
        self.head.and_then(|i| arena.key_at(i))
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}
