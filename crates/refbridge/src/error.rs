//! Reference layer errors

use crate::engine::EngineId;
use crate::gc::HeapError;
use crate::reference::NativeRef;

/// Errors raised by reference operations
///
/// Benign misuse (unref at zero, reading a collected reference, deleting
/// twice) is absorbed by the operations themselves and never shows up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The reference was deleted, or belongs to an engine that was released
    #[error("Reference {0:?} is stale")]
    Stale(NativeRef),

    /// A reference or value was used with an engine that does not own it
    #[error("Item owned by engine {owner} used with engine {engine}")]
    ForeignEngine {
        /// Engine that created the reference or allocated the value
        owner: EngineId,
        /// Engine the operation was issued against
        engine: EngineId,
    },

    /// The engine has started tearing down and accepts no new references
    #[error("Engine {0} is tearing down")]
    EngineTornDown(EngineId),

    /// ref/unref issued while the reference's finalizer is running
    #[error("Reference {0:?} is finalizing")]
    Finalizing(NativeRef),

    /// The object already carries a native wrap
    #[error("Object is already wrapped")]
    AlreadyWrapped,

    /// The object carries no native wrap
    #[error("Object is not wrapped")]
    NotWrapped,

    /// A wrap operation was given options it cannot honor
    #[error("Invalid wrap options: {0}")]
    InvalidWrap(&'static str),

    /// Underlying heap error
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Result type for reference operations
pub type RefResult<T> = Result<T, ReferenceError>;
