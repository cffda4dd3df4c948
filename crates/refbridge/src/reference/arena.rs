//! Reference arena
//!
//! Generation-tagged slots with a free list. Keys stay valid until their
//! slot is removed; a key that outlives its slot resolves to nothing.

use super::native::NativeReference;
use crate::gc::WeakToken;

/// Arena key of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RefKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RefKey {
    /// Pack into a weak-handle token
    pub(crate) fn to_token(self) -> WeakToken {
        WeakToken(((self.generation as u64) << 32) | self.index as u64)
    }

    /// Unpack from a weak-handle token
    pub(crate) fn from_token(token: WeakToken) -> Self {
        Self {
            index: token.0 as u32,
            generation: (token.0 >> 32) as u32,
        }
    }
}

#[derive(Debug)]
struct RefSlot {
    generation: u32,
    reference: Option<NativeReference>,
}

#[derive(Debug, Default)]
pub(crate) struct ReferenceArena {
    slots: Vec<RefSlot>,
    free: Vec<u32>,
    len: usize,
}

impl ReferenceArena {
    pub(crate) fn insert(&mut self, reference: NativeReference) -> RefKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.reference = Some(reference);
            return RefKey {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(RefSlot {
            generation: 0,
            reference: Some(reference),
        });
        RefKey {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, key: RefKey) -> Option<&NativeReference> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.reference.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: RefKey) -> Option<&mut NativeReference> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.reference.as_mut())
    }

    /// Occupied slot by raw index, for manager link maintenance
    pub(crate) fn get_at_mut(&mut self, index: u32) -> Option<&mut NativeReference> {
        self.slots
            .get_mut(index as usize)
            .and_then(|slot| slot.reference.as_mut())
    }

    /// Current key of an occupied slot
    pub(crate) fn key_at(&self, index: u32) -> Option<RefKey> {
        let slot = self.slots.get(index as usize)?;
        slot.reference.as_ref().map(|_| RefKey {
            index,
            generation: slot.generation,
        })
    }

    pub(crate) fn remove(&mut self, key: RefKey) -> Option<NativeReference> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let reference = slot.reference.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(reference)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
