//! Native reference record

use super::manager::ManagerLinks;
use super::state::{HandleState, Ownership, ReferenceInfo, ReferenceState};
use crate::engine::counters::Accounting;
use crate::engine::EngineId;
use crate::finalizer::Finalizer;
use crate::gc::{GlobalHandle, Heap, HandleMode};

/// A native reference as stored in its engine's arena
#[derive(Debug)]
pub(crate) struct NativeReference {
    pub(crate) engine_id: EngineId,
    pub(crate) handle: Option<GlobalHandle>,
    pub(crate) ref_count: u32,
    pub(crate) ownership: Ownership,
    pub(crate) is_async: bool,
    pub(crate) cross_runtime: bool,
    pub(crate) state: ReferenceState,
    /// Set by the destructor so a re-entrant delete is a no-op
    pub(crate) has_delete: bool,
    pub(crate) finalizer: Option<Finalizer>,
    pub(crate) accounting: Accounting,
    pub(crate) native_binding_size: usize,
    pub(crate) links: ManagerLinks,
}

impl NativeReference {
    /// Runtime-owned references free themselves once finalized
    pub(crate) fn delete_self(&self) -> bool {
        self.ownership == Ownership::Runtime
    }

    pub(crate) fn info(&self, heap: &Heap) -> ReferenceInfo {
        let handle = match self.handle.and_then(|h| heap.handle_mode(h)) {
            Some(HandleMode::Strong) => HandleState::Strong,
            Some(HandleMode::Weak(_)) => HandleState::Weak,
            None => HandleState::Empty,
        };
        ReferenceInfo {
            state: self.state,
            ref_count: self.ref_count,
            ownership: self.ownership,
            is_async: self.is_async,
            cross_runtime: self.cross_runtime,
            handle,
            native_binding_size: self.native_binding_size,
            has_finalizer: self.finalizer.is_some(),
        }
    }
}
