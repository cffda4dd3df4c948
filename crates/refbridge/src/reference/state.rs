//! Reference state and ownership

/// Lifecycle state of a native reference
///
/// ```text
/// ActiveStrong <-> ActiveWeak
///       \             /
///        v           v
///         Finalizing -> Finalized
/// ```
///
/// The transition into `Finalizing` happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    /// Refcount above zero; the handle keeps the value alive
    ActiveStrong,
    /// Refcount zero; the value may be collected
    ActiveWeak,
    /// The finalizer decision is being made or the finalizer is running
    Finalizing,
    /// Finalization is complete; the handle is empty
    Finalized,
}

impl ReferenceState {
    /// Initial state for a given refcount
    pub(crate) fn for_refcount(ref_count: u32) -> Self {
        if ref_count == 0 {
            ReferenceState::ActiveWeak
        } else {
            ReferenceState::ActiveStrong
        }
    }

    /// Whether finalization has started or finished
    pub fn final_ran(&self) -> bool {
        matches!(self, ReferenceState::Finalizing | ReferenceState::Finalized)
    }
}

/// Who is responsible for destroying a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The engine destroys it: after its finalizer, or at teardown
    Runtime,
    /// The caller holds the handle and must delete it
    User,
}

/// Observable strength of a reference's handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Keeps the value alive
    Strong,
    /// Does not keep the value alive
    Weak,
    /// Freed or emptied by collection
    Empty,
}

/// Snapshot of a reference, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceInfo {
    /// Lifecycle state
    pub state: ReferenceState,
    /// Current refcount
    pub ref_count: u32,
    /// Ownership
    pub ownership: Ownership,
    /// Whether collection routes the finalizer through the async queue
    pub is_async: bool,
    /// Whether the handle uses the cross-runtime create/free pair
    pub cross_runtime: bool,
    /// Handle strength
    pub handle: HandleState,
    /// Bytes reported as external memory
    pub native_binding_size: usize,
    /// Whether a finalizer is still attached
    pub has_finalizer: bool,
}
