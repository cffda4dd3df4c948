//! Global handles
//!
//! A global handle keeps a heap object reachable from outside the heap.
//! Strong handles are roots. Weak handles do not keep their target alive;
//! when the target is swept the heap frees the handle and reports its
//! token through [`WeakCallback::on_collected`].

use super::value::Value;
use std::fmt;

/// Which create/free pair a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Handle created for the engine's own runtime
    Local,
    /// Handle shared with another runtime; freed only through the
    /// cross-runtime path
    CrossRuntime,
}

/// Token handed back when a weak handle's target is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakToken(pub u64);

/// Strength of a live handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    /// Keeps the target alive
    Strong,
    /// Does not keep the target alive; the token is reported on collection
    Weak(WeakToken),
}

/// Receives collection notifications for weak handles
pub trait WeakCallback {
    /// Called once per weak handle whose target was swept. The handle has
    /// already been freed by the time this runs.
    fn on_collected(&mut self, token: WeakToken);
}

/// Global handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHandle {
    index: u32,
    generation: u32,
    kind: HandleKind,
}

impl GlobalHandle {
    /// Create/free pair this handle belongs to
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Display for GlobalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}v{}", self.kind, self.index, self.generation)
    }
}

#[derive(Debug)]
pub(super) struct HandleEntry {
    pub(super) target: Value,
    pub(super) mode: HandleMode,
}

#[derive(Debug)]
struct HandleSlot {
    generation: u32,
    kind: HandleKind,
    entry: Option<HandleEntry>,
}

/// Slot table of global handles
#[derive(Debug, Default)]
pub(super) struct HandleTable {
    slots: Vec<HandleSlot>,
    free: Vec<u32>,
    live: usize,
}

impl HandleTable {
    pub(super) fn insert(&mut self, target: Value, kind: HandleKind) -> GlobalHandle {
        let entry = HandleEntry {
            target,
            mode: HandleMode::Strong,
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.kind = kind;
            slot.entry = Some(entry);
            return GlobalHandle {
                index,
                generation: slot.generation,
                kind,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(HandleSlot {
            generation: 0,
            kind,
            entry: Some(entry),
        });
        GlobalHandle {
            index,
            generation: 0,
            kind,
        }
    }

    pub(super) fn get(&self, handle: GlobalHandle) -> Option<&HandleEntry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub(super) fn get_mut(&mut self, handle: GlobalHandle) -> Option<&mut HandleEntry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub(super) fn remove(&mut self, handle: GlobalHandle) -> Option<HandleEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        Self::retire(slot, handle.index, &mut self.free);
        self.live -= 1;
        Some(entry)
    }

    /// Iterate over the targets of strong handles
    pub(super) fn strong_targets(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.mode == HandleMode::Strong)
            .map(|entry| entry.target)
    }

    /// Free every weak handle whose target is dead, returning their tokens
    /// in slot order.
    pub(super) fn sweep_weak(&mut self, is_alive: impl Fn(Value) -> bool) -> Vec<WeakToken> {
        let mut tokens = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let token = match &slot.entry {
                Some(HandleEntry {
                    target,
                    mode: HandleMode::Weak(token),
                }) if !is_alive(*target) => *token,
                _ => continue,
            };
            slot.entry = None;
            Self::retire(slot, index as u32, &mut self.free);
            self.live -= 1;
            tokens.push(token);
        }
        tokens
    }

    pub(super) fn len(&self) -> usize {
        self.live
    }

    fn retire(slot: &mut HandleSlot, index: u32, free: &mut Vec<u32>) {
        slot.generation = slot.generation.wrapping_add(1);
        free.push(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;

    #[test]
    fn test_handle_table_reuses_slots_with_new_generation() {
        let mut table = HandleTable::default();
        let target = Value::new(EngineId::allocate(), 0, 0);

        let first = table.insert(target, HandleKind::Local);
        assert!(table.remove(first).is_some());
        let second = table.insert(target, HandleKind::CrossRuntime);

        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert_eq!(table.get(second).map(|e| e.target), Some(target));
        assert_eq!(second.kind(), HandleKind::CrossRuntime);
    }

    #[test]
    fn test_sweep_weak_only_frees_dead_weak_targets() {
        let mut table = HandleTable::default();
        let owner = EngineId::allocate();
        let dead = Value::new(owner, 1, 0);
        let alive = Value::new(owner, 2, 0);

        let weak_dead = table.insert(dead, HandleKind::Local);
        let weak_alive = table.insert(alive, HandleKind::Local);
        let strong_dead = table.insert(dead, HandleKind::Local);
        table.get_mut(weak_dead).unwrap().mode = HandleMode::Weak(WeakToken(7));
        table.get_mut(weak_alive).unwrap().mode = HandleMode::Weak(WeakToken(8));

        let tokens = table.sweep_weak(|v| v == alive);

        assert_eq!(tokens, vec![WeakToken(7)]);
        assert!(table.get(weak_dead).is_none());
        assert!(table.get(weak_alive).is_some());
        assert!(table.get(strong_dead).is_some());
        assert_eq!(table.len(), 2);
    }
}
