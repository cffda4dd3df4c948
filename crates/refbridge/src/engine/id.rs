//! Engine identity
//!
//! Every engine takes a slot in a process-wide table. An [`EngineId`] names
//! the slot and the generation it had when the engine was created, so code
//! holding an id can tell whether its engine is still alive without holding
//! a pointer to it.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;

static ENGINE_TABLE: Lazy<Mutex<EngineTable>> = Lazy::new(|| Mutex::new(EngineTable::default()));

/// Generation-tagged engine identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId {
    index: u32,
    generation: u32,
}

impl EngineId {
    /// Claim a slot for a new engine
    pub(crate) fn allocate() -> Self {
        ENGINE_TABLE.lock().allocate()
    }

    /// Release the slot; every copy of this id stops being live
    pub(crate) fn retire(self) {
        ENGINE_TABLE.lock().retire(self);
    }

    /// Whether the engine this id names has not been released
    pub fn is_live(&self) -> bool {
        ENGINE_TABLE.lock().is_live(*self)
    }

    /// Slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct EngineTable {
    /// Current generation and liveness per slot
    slots: Vec<(u32, bool)>,
    free: Vec<u32>,
}

impl EngineTable {
    fn allocate(&mut self) -> EngineId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.1 = true;
            return EngineId {
                index,
                generation: slot.0,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push((0, true));
        EngineId {
            index,
            generation: 0,
        }
    }

    fn retire(&mut self, id: EngineId) {
        if !self.is_live(id) {
            return;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.0 = slot.0.wrapping_add(1);
        slot.1 = false;
        self.free.push(id.index);
    }

    fn is_live(&self, id: EngineId) -> bool {
        matches!(self.slots.get(id.index as usize), Some(&(generation, true)) if generation == id.generation)
    }
}
