//! Heap values

use crate::engine::EngineId;
use std::fmt;

/// Handle to a heap object
///
/// A value names the engine whose heap allocated it, an object slot, and
/// the generation the slot had when the object was allocated. A value that
/// outlives its object never resolves to whatever reuses the slot, and a
/// value from one engine never resolves in another engine's heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    owner: EngineId,
    index: u32,
    generation: u32,
}

impl Value {
    pub(crate) fn new(owner: EngineId, index: u32, generation: u32) -> Self {
        Self {
            owner,
            index,
            generation,
        }
    }

    /// Engine whose heap allocated this value
    pub fn owner(&self) -> EngineId {
        self.owner
    }

    /// Slot index of the object
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot at allocation time
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}v{}", self.owner, self.index, self.generation)
    }
}
