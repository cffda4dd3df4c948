//! Native Reference Bridge
//!
//! This crate connects native (non-garbage-collected) handles to values that
//! live inside a garbage-collected heap:
//! - **References**: strong/weak handles with refcounts (`reference` module)
//! - **Finalizers**: exactly-once finalizer dispatch, batches and async queues
//!   (`finalizer` module)
//! - **Engines**: main, worker and secondary context engines with their
//!   counters and identity table (`engine` module)
//! - **GC**: the handle-bearing mark-sweep heap references point into
//!   (`gc` module)
//! - **API**: napi-style boundary functions (`api` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use refbridge::{api, Engine};
//!
//! let engine = Engine::new();
//! let object = engine.create_object();
//!
//! let reference = api::create_reference(&engine, object, 1)?;
//! api::reference_unref(&engine, reference)?;
//!
//! engine.collect_garbage();
//! assert_eq!(api::get_reference_value(&engine, reference)?, None);
//! api::delete_reference(&engine, reference)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Default configuration constants
pub mod defaults;

/// Error types shared by the reference layer
pub mod error;

/// Handle-bearing heap: objects, roots, global handles and collection
pub mod gc;

/// Engines, engine identity and reference counters
pub mod engine;

/// Native references and the runtime-owned reference manager
pub mod reference;

/// Finalizer descriptors, batches, async queues and dispatch
pub mod finalizer;

/// Boundary operations over engines and references
pub mod api;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{CounterSnapshot, Engine, EngineId, EngineKind, EngineOptions, ReferenceCounters};
pub use error::{RefResult, ReferenceError};
pub use finalizer::{
    AsyncFinalizerQueue, AsyncFinalizerWorker, FinalizeCallback, Finalizer, FinalizerState,
    NativePtr,
};
pub use gc::{GcStats, HeapError, HeapStats, Value};
pub use reference::{HandleState, NativeRef, Ownership, ReferenceInfo, ReferenceOptions, ReferenceState};
pub use api::WrapOptions;
