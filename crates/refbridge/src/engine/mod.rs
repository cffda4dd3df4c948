//! Engines
//!
//! An engine owns a heap, the references created against it, a finalizer
//! batch and a handle to its root's async finalizer queue. Three kinds
//! exist:
//! - **Main**: the root engine of the process
//! - **Worker**: a root engine living on its own thread
//! - **Context**: a secondary engine that shares its parent's thread and
//!   async queue, and routes its synchronous finalizers through the
//!   parent's batch
//!
//! Engines are single-threaded (`!Send`). The only cross-thread structure
//! is the [`AsyncFinalizerQueue`].

pub(crate) mod counters;
mod id;

pub use counters::{CounterSnapshot, ReferenceCounters};
pub use id::EngineId;

use crate::defaults::DEFAULT_FINALIZER_DRAIN_THRESHOLD;
use crate::error::{RefResult, ReferenceError};
use crate::finalizer::{AsyncFinalizerQueue, FinalizerBatch, PendingFinalizer};
use crate::gc::{GcStats, Heap, HeapError, HeapStats, Value};
use crate::reference::{NativeRef, ReferenceStore};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Kind of engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Root engine on the main thread
    Main,
    /// Root engine on a worker thread
    Worker,
    /// Secondary context under a root engine
    Context,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Label used in log output
    pub name: Option<String>,

    /// Pending native binding size (bytes) above which the finalizer batch
    /// is drained at the end of a collection
    pub finalizer_drain_threshold: usize,

    /// Drain the finalizer batch at the end of every collection
    pub drain_after_collection: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            name: None,
            finalizer_drain_threshold: DEFAULT_FINALIZER_DRAIN_THRESHOLD,
            drain_after_collection: false,
        }
    }
}

/// Mutable per-engine state
pub(crate) struct EngineState {
    pub(crate) heap: Heap,
    pub(crate) references: ReferenceStore,
    pub(crate) finalizers: FinalizerBatch,
    /// Wrapped objects and the reference created by their wrap
    pub(crate) wraps: FxHashMap<Value, NativeRef>,
}

impl EngineState {
    fn new(owner: EngineId) -> Self {
        Self {
            heap: Heap::new(owner),
            references: ReferenceStore::default(),
            finalizers: FinalizerBatch::default(),
            wraps: FxHashMap::default(),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) id: EngineId,
    pub(crate) kind: EngineKind,
    pub(crate) parent: Option<Weak<EngineInner>>,
    pub(crate) options: EngineOptions,
    pub(crate) counters: ReferenceCounters,
    pub(crate) async_queue: Arc<AsyncFinalizerQueue>,
    pub(crate) in_destructor: Cell<bool>,
    pub(crate) teardown_requested: Cell<bool>,
    pub(crate) released: Cell<bool>,
    pub(crate) state: RefCell<EngineState>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if !self.released.get() {
            self.id.retire();
        }
    }
}

/// Handle to an engine
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<EngineInner>,
}

impl Engine {
    /// Create a main engine with default options
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    /// Create a main engine
    pub fn with_options(options: EngineOptions) -> Self {
        Self::build(
            EngineKind::Main,
            None,
            Arc::new(AsyncFinalizerQueue::new()),
            options,
        )
    }

    /// Create a worker engine; it is its own root and owns its async queue
    pub fn new_worker(options: EngineOptions) -> Self {
        Self::build(
            EngineKind::Worker,
            None,
            Arc::new(AsyncFinalizerQueue::new()),
            options,
        )
    }

    /// Create a secondary context
    ///
    /// Contexts always hang off a root engine: creating a context from a
    /// context makes a sibling under the same root.
    pub fn create_context(&self) -> RefResult<Engine> {
        let root = match self.kind() {
            EngineKind::Context => self
                .parent()
                .ok_or(ReferenceError::EngineTornDown(self.id()))?,
            _ => self.clone(),
        };
        if root.is_torn_down() {
            return Err(ReferenceError::EngineTornDown(root.id()));
        }

        let context = Self::build(
            EngineKind::Context,
            Some(Rc::downgrade(&root.inner)),
            Arc::clone(&root.inner.async_queue),
            root.inner.options.clone(),
        );
        tracing::debug!(engine = %context.id(), parent = %root.id(), "context created");
        Ok(context)
    }

    fn build(
        kind: EngineKind,
        parent: Option<Weak<EngineInner>>,
        async_queue: Arc<AsyncFinalizerQueue>,
        options: EngineOptions,
    ) -> Self {
        let id = EngineId::allocate();
        let inner = EngineInner {
            id,
            kind,
            parent,
            options,
            counters: ReferenceCounters::new(),
            async_queue,
            in_destructor: Cell::new(false),
            teardown_requested: Cell::new(false),
            released: Cell::new(false),
            state: RefCell::new(EngineState::new(id)),
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    // ===== Identity =====

    /// Engine identity
    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    /// Engine kind
    pub fn kind(&self) -> EngineKind {
        self.inner.kind
    }

    /// Whether this engine processes its own synchronous finalizers
    pub fn is_main_context(&self) -> bool {
        self.inner.kind != EngineKind::Context
    }

    /// Parent engine of a context, if it is still around
    pub fn parent(&self) -> Option<Engine> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Engine { inner })
    }

    /// Engine options
    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Whether two handles name the same engine
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ===== Counters and queues =====

    /// Reference counters
    pub fn counters(&self) -> &ReferenceCounters {
        &self.inner.counters
    }

    /// Async finalizer queue of this engine's root
    pub fn async_finalizer_queue(&self) -> Arc<AsyncFinalizerQueue> {
        Arc::clone(&self.inner.async_queue)
    }

    /// Number of entries waiting in this engine's finalizer batch
    pub fn pending_finalizers(&self) -> usize {
        self.inner.state.borrow().finalizers.len()
    }

    /// Native binding size accounted to this engine's finalizer batch
    pub fn pending_native_binding_size(&self) -> usize {
        self.inner.state.borrow().finalizers.pending_native_binding_size()
    }

    /// Number of live references in this engine
    pub fn reference_count(&self) -> usize {
        self.inner.state.borrow().references.arena.len()
    }

    /// Number of runtime-owned references registered with the manager
    pub fn runtime_reference_count(&self) -> usize {
        self.inner.state.borrow().references.manager.len()
    }

    // ===== Heap =====

    /// Allocate an empty object
    pub fn create_object(&self) -> Value {
        self.inner.state.borrow_mut().heap.allocate()
    }

    /// Add an edge from `object` to `child`
    pub fn link(&self, object: Value, child: Value) -> RefResult<()> {
        self.check_value(object)?;
        self.check_value(child)?;
        Ok(self.inner.state.borrow_mut().heap.link(object, child)?)
    }

    /// Remove one edge from `object` to `child`
    pub fn unlink(&self, object: Value, child: Value) -> RefResult<bool> {
        self.check_value(object)?;
        self.check_value(child)?;
        Ok(self.inner.state.borrow_mut().heap.unlink(object, child)?)
    }

    /// Pin a value as a persistent root
    pub fn add_root(&self, value: Value) -> RefResult<()> {
        self.check_value(value)?;
        let mut state = self.inner.state.borrow_mut();
        if !state.heap.is_alive(value) {
            return Err(HeapError::DeadObject(value).into());
        }
        state.heap.roots_mut().add_persistent_root(value);
        Ok(())
    }

    /// Unpin a persistent root
    pub fn remove_root(&self, value: Value) -> bool {
        self.inner
            .state
            .borrow_mut()
            .heap
            .roots_mut()
            .remove_persistent_root(value)
    }

    /// Root a value until the next [`Engine::clear_scope_roots`]
    pub fn add_scope_root(&self, value: Value) -> RefResult<()> {
        self.check_value(value)?;
        let mut state = self.inner.state.borrow_mut();
        if !state.heap.is_alive(value) {
            return Err(HeapError::DeadObject(value).into());
        }
        state.heap.roots_mut().add_scope_root(value);
        Ok(())
    }

    /// Drop every scope root
    pub fn clear_scope_roots(&self) {
        self.inner.state.borrow_mut().heap.roots_mut().clear_scope_roots();
    }

    /// Reject a value allocated by another engine's heap
    pub(crate) fn check_value(&self, value: Value) -> RefResult<()> {
        if value.owner() != self.id() {
            return Err(ReferenceError::ForeignEngine {
                owner: value.owner(),
                engine: self.id(),
            });
        }
        Ok(())
    }

    /// Whether a value still names a live object
    pub fn is_alive(&self, value: Value) -> bool {
        self.inner.state.borrow().heap.is_alive(value)
    }

    /// Heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.inner.state.borrow().heap.stats()
    }

    /// Collection statistics
    pub fn gc_stats(&self) -> GcStats {
        self.inner.state.borrow().heap.gc_stats().clone()
    }

    /// Native memory reported against this engine's heap
    pub fn external_memory(&self) -> i64 {
        self.inner.state.borrow().heap.external_memory()
    }

    /// Run a full collection and dispatch finalizers for collected references
    ///
    /// Returns the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        if self.is_released() {
            return 0;
        }

        let (freed, collected) = {
            let mut state = self.inner.state.borrow_mut();
            let EngineState {
                heap,
                references,
                wraps,
                ..
            } = &mut *state;
            let freed = heap.collect(references);
            wraps.retain(|object, _| heap.is_alive(*object));
            (freed, references.take_collected())
        };

        if !collected.is_empty() {
            tracing::trace!(engine = %self.id(), count = collected.len(), "references collected");
        }
        for key in collected {
            self.finalize(key, crate::finalizer::FinalizerState::Collection);
        }

        self.post_finalize_tasks();
        self.release_if_ready();
        freed
    }

    // ===== Teardown =====

    /// Whether teardown has begun
    pub fn is_torn_down(&self) -> bool {
        self.inner.teardown_requested.get()
    }

    /// Whether finalizer dispatch from this engine is suppressed
    pub fn is_in_destructor(&self) -> bool {
        self.inner.in_destructor.get()
    }

    /// Whether the engine's identity has been retired and its state dropped
    pub fn is_released(&self) -> bool {
        self.inner.released.get()
    }

    /// Whether a torn-down engine has settled every reference it created
    pub fn is_ready_to_delete(&self) -> bool {
        self.is_in_destructor() && self.inner.counters.is_zero()
    }

    /// Tear the engine down
    ///
    /// Runtime-owned references are destroyed first, running their
    /// finalizers inline. Dispatch is then suppressed and whatever is left
    /// in the finalizer batch is dropped without running. Root engines are
    /// released immediately; a context whose finalizers are still pending in
    /// its parent's batch is released when the last of them completes.
    pub fn destroy(self) {
        if self.inner.teardown_requested.replace(true) {
            return;
        }
        tracing::debug!(engine = %self.id(), kind = ?self.kind(), "tearing down engine");

        let mut swept = 0usize;
        loop {
            let first = {
                let state = self.inner.state.borrow();
                state.references.manager.first(&state.references.arena)
            };
            let Some(key) = first else {
                break;
            };
            self.destroy_reference(key);
            swept += 1;
        }
        debug_assert!(self.inner.state.borrow().references.manager.is_empty());

        self.inner.in_destructor.set(true);

        let dropped = self.inner.state.borrow_mut().finalizers.take_all();
        if !dropped.is_empty() {
            tracing::warn!(
                engine = %self.id(),
                count = dropped.len(),
                "dropping pending finalizers at teardown"
            );
        }
        for entry in dropped {
            self.abandon(entry);
        }

        tracing::debug!(engine = %self.id(), swept, "runtime references swept");

        match self.kind() {
            EngineKind::Context if !self.is_ready_to_delete() => {
                tracing::debug!(
                    engine = %self.id(),
                    counters = ?self.inner.counters.snapshot(),
                    "context deletion deferred until pending finalizers complete"
                );
            }
            _ => self.release(),
        }
    }

    /// Settle a batch entry that will never run
    pub(crate) fn abandon(&self, entry: PendingFinalizer) {
        let PendingFinalizer {
            mut accounting,
            origin,
            ..
        } = entry;
        match origin {
            Some(child) => {
                accounting.settle(&child.inner.counters);
                child.release_if_ready();
            }
            None => accounting.settle(&self.inner.counters),
        }
    }

    /// Release a torn-down context once its counters reach zero
    pub(crate) fn release_if_ready(&self) {
        if self.kind() == EngineKind::Context && !self.is_released() && self.is_ready_to_delete() {
            self.release();
        }
    }

    fn release(&self) {
        if self.inner.released.replace(true) {
            return;
        }
        self.inner.id.retire();
        let state = std::mem::replace(
            &mut *self.inner.state.borrow_mut(),
            EngineState::new(self.id()),
        );
        tracing::debug!(
            engine = %self.id(),
            leaked_references = state.references.arena.len(),
            "engine released"
        );
        drop(state);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("name", &self.inner.options.name)
            .field("counters", &self.inner.counters.snapshot())
            .field("in_destructor", &self.is_in_destructor())
            .finish()
    }
}
