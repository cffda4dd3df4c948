//! Finalizer batch
//!
//! FIFO of synchronous finalizers whose values were collected, drained on
//! the owning thread at a GC-safe point. Entries posted by a secondary
//! context carry that context as their origin so the drain can settle the
//! context's counters instead of the owner's.

use super::{NativePtr, SyncFinalizeFn};
use crate::engine::counters::Accounting;
use crate::engine::Engine;
use std::collections::VecDeque;
use std::fmt;

/// A collected reference's finalizer waiting to run
pub(crate) struct PendingFinalizer {
    pub(crate) callback: SyncFinalizeFn,
    pub(crate) data: NativePtr,
    pub(crate) hint: NativePtr,
    pub(crate) accounting: Accounting,
    pub(crate) native_binding_size: usize,
    /// Context the reference belonged to, for entries posted by a context
    pub(crate) origin: Option<Engine>,
}

impl fmt::Debug for PendingFinalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFinalizer")
            .field("data", &self.data)
            .field("hint", &self.hint)
            .field("accounting", &self.accounting)
            .field("native_binding_size", &self.native_binding_size)
            .field("origin", &self.origin.as_ref().map(Engine::id))
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct FinalizerBatch {
    entries: VecDeque<PendingFinalizer>,
    pending_native_binding_size: usize,
}

impl FinalizerBatch {
    pub(crate) fn push(&mut self, entry: PendingFinalizer) {
        self.pending_native_binding_size += entry.native_binding_size;
        self.entries.push_back(entry);
    }

    /// Take every entry in FIFO order, resetting the accounted size
    pub(crate) fn take_all(&mut self) -> VecDeque<PendingFinalizer> {
        self.pending_native_binding_size = 0;
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn pending_native_binding_size(&self) -> usize {
        self.pending_native_binding_size
    }
}
