//! Native references
//!
//! A native reference owns a global handle to a heap value, a refcount that
//! toggles the handle between strong and weak, and an optional finalizer.
//! Runtime-owned references are tracked by the engine's reference manager
//! so teardown can destroy them; user-owned references are destroyed by
//! whoever holds the [`NativeRef`].

mod arena;
mod lifecycle;
mod manager;
mod native;
mod state;

pub use state::{HandleState, Ownership, ReferenceInfo, ReferenceState};

pub(crate) use arena::{RefKey, ReferenceArena};
pub(crate) use manager::ReferenceManager;

use crate::engine::EngineId;
use crate::finalizer::Finalizer;
use crate::gc::{WeakCallback, WeakToken};
use std::fmt;

/// Opaque handle to a native reference
///
/// Copyable and engine-tagged; every operation checks it against the engine
/// it is issued on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeRef {
    engine: EngineId,
    key: RefKey,
}

impl NativeRef {
    pub(crate) fn new(engine: EngineId, key: RefKey) -> Self {
        Self { engine, key }
    }

    /// Engine that created this reference
    pub fn engine_id(&self) -> EngineId {
        self.engine
    }

    pub(crate) fn key(&self) -> RefKey {
        self.key
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NativeRef({}/{}v{})",
            self.engine, self.key.index, self.key.generation
        )
    }
}

/// Construction parameters for a native reference
#[derive(Debug)]
pub struct ReferenceOptions {
    pub(crate) initial_refcount: u32,
    pub(crate) ownership: Ownership,
    pub(crate) finalizer: Option<Finalizer>,
    pub(crate) native_binding_size: usize,
    pub(crate) cross_runtime: bool,
}

impl ReferenceOptions {
    /// User-owned reference with no finalizer
    pub fn new(initial_refcount: u32) -> Self {
        Self {
            initial_refcount,
            ownership: Ownership::User,
            finalizer: None,
            native_binding_size: 0,
            cross_runtime: false,
        }
    }

    /// Set ownership
    pub fn ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    /// Attach a finalizer; its callback kind decides sync or async dispatch
    pub fn finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Bytes of native memory to report against the heap
    pub fn native_binding_size(mut self, size: usize) -> Self {
        self.native_binding_size = size;
        self
    }

    /// Use the cross-runtime handle create/free pair
    pub fn cross_runtime(mut self) -> Self {
        self.cross_runtime = true;
        self
    }
}

/// Per-engine reference storage
#[derive(Debug, Default)]
pub(crate) struct ReferenceStore {
    pub(crate) arena: ReferenceArena,
    pub(crate) manager: ReferenceManager,
    /// References whose handles were emptied by the last collection
    collected: Vec<RefKey>,
}

impl ReferenceStore {
    pub(crate) fn take_collected(&mut self) -> Vec<RefKey> {
        std::mem::take(&mut self.collected)
    }
}

impl WeakCallback for ReferenceStore {
    fn on_collected(&mut self, token: WeakToken) {
        let key = RefKey::from_token(token);
        if let Some(reference) = self.arena.get_mut(key) {
            reference.handle = None;
            self.collected.push(key);
        }
    }
}
