//! Handle-bearing heap
//!
//! The value layer references point into. It is a small mark-sweep heap:
//! - `heap`: object slots, edges, native slots and external memory
//! - `handle`: global handles (strong, weak, cross-runtime) and the
//!   collection callback contract
//! - `roots`: explicit root set
//! - `collector`: mark-sweep collection and statistics

mod collector;
mod handle;
mod heap;
mod roots;
mod value;

pub use collector::GcStats;
pub use handle::{GlobalHandle, HandleKind, HandleMode, WeakCallback, WeakToken};
pub use heap::{Heap, HeapStats};
pub use roots::RootSet;
pub use value::Value;

use std::fmt;

/// Errors raised by heap and handle operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The value does not name a live object
    #[error("Object {0} is not live")]
    DeadObject(Value),

    /// The handle was freed or emptied by collection
    #[error("Handle {0} is empty")]
    EmptyHandle(GlobalHandle),

    /// The handle was freed through the wrong create/free pair
    #[error("Handle {handle} must be freed through the {expected} path")]
    HandleKindMismatch {
        /// Offending handle
        handle: GlobalHandle,
        /// Path the handle was created through
        expected: HandleKind,
    },
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Local => write!(f, "local"),
            HandleKind::CrossRuntime => write!(f, "cross-runtime"),
        }
    }
}
