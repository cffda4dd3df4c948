//! Finalizers
//!
//! A finalizer is a native callback plus two opaque pointers (`data` and
//! `hint`) that runs once when the value a reference points to dies:
//! - inline, when the reference is destroyed explicitly
//! - from the engine's finalizer batch, when a synchronous finalizer's
//!   value is collected
//! - from the root engine's [`AsyncFinalizerQueue`], on any thread, when an
//!   asynchronous finalizer's value is collected

mod async_queue;
mod batch;
mod dispatch;
mod worker;

pub use async_queue::{AsyncFinalizer, AsyncFinalizerQueue};
pub use worker::AsyncFinalizerWorker;

pub(crate) use batch::{FinalizerBatch, PendingFinalizer};

use crate::engine::Engine;
use std::fmt;

/// Opaque native pointer carried through finalizers
///
/// Stored as an address so it can cross threads with async finalizers; it
/// is never dereferenced by this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativePtr(usize);

impl NativePtr {
    /// The null pointer
    pub const fn null() -> Self {
        Self(0)
    }

    /// Wrap a raw pointer
    pub fn from_raw<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    /// Wrap a raw address
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    /// Raw address
    pub fn addr(&self) -> usize {
        self.0
    }

    /// Reinterpret as a raw pointer
    pub fn as_raw<T>(&self) -> *mut T {
        self.0 as *mut T
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

/// Synchronous finalizer: runs on the engine's thread with the engine
pub type SyncFinalizeFn = Box<dyn FnOnce(&Engine, NativePtr, NativePtr)>;

/// Asynchronous finalizer: may run on any thread, without an engine
pub type AsyncFinalizeFn = Box<dyn FnOnce(NativePtr, NativePtr) + Send>;

/// Finalizer callback
pub enum FinalizeCallback {
    /// Runs on the owning thread; collected values go through the batch
    Sync(SyncFinalizeFn),
    /// Runs anywhere; collected values go through the root async queue
    Async(AsyncFinalizeFn),
}

impl FinalizeCallback {
    /// Build a synchronous callback
    pub fn sync(f: impl FnOnce(&Engine, NativePtr, NativePtr) + 'static) -> Self {
        Self::Sync(Box::new(f))
    }

    /// Build an asynchronous callback
    pub fn asynchronous(f: impl FnOnce(NativePtr, NativePtr) + Send + 'static) -> Self {
        Self::Async(Box::new(f))
    }

    /// Whether collection routes this callback through the async queue
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for FinalizeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("FinalizeCallback::Sync"),
            Self::Async(_) => f.write_str("FinalizeCallback::Async"),
        }
    }
}

/// Finalizer descriptor: callback plus its two opaque arguments
#[derive(Debug)]
pub struct Finalizer {
    callback: FinalizeCallback,
    data: NativePtr,
    hint: NativePtr,
}

impl Finalizer {
    /// Create a finalizer
    pub fn new(callback: FinalizeCallback, data: NativePtr, hint: NativePtr) -> Self {
        Self {
            callback,
            data,
            hint,
        }
    }

    /// Whether collection routes this finalizer through the async queue
    pub fn is_async(&self) -> bool {
        self.callback.is_async()
    }

    /// Native data pointer
    pub fn data(&self) -> NativePtr {
        self.data
    }

    /// Hint pointer
    pub fn hint(&self) -> NativePtr {
        self.hint
    }

    /// Run the callback in place
    pub(crate) fn invoke(self, engine: &Engine) {
        match self.callback {
            FinalizeCallback::Sync(f) => f(engine, self.data, self.hint),
            FinalizeCallback::Async(f) => f(self.data, self.hint),
        }
    }

    pub(crate) fn into_parts(self) -> (FinalizeCallback, NativePtr, NativePtr) {
        (self.callback, self.data, self.hint)
    }
}

/// Why a reference is being finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Explicit destruction; the finalizer runs inline
    Destruction,
    /// The collector reclaimed the value; the finalizer is dispatched
    Collection,
}
