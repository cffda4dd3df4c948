//! Reference lifecycle: construction, ref/unref, get and destruction

use super::native::NativeReference;
use super::state::{Ownership, ReferenceInfo, ReferenceState};
use super::{NativeRef, RefKey, ReferenceOptions};
use crate::engine::counters::Accounting;
use crate::engine::{Engine, EngineState};
use crate::error::{RefResult, ReferenceError};
use crate::finalizer::FinalizerState;
use crate::gc::{HandleKind, Value};

impl Engine {
    /// Create a native reference to `value`
    ///
    /// The handle starts strong, and is made weak right away when the
    /// initial refcount is zero. Runtime-owned references are registered
    /// with the engine's manager.
    pub fn new_reference(&self, value: Value, options: ReferenceOptions) -> RefResult<NativeRef> {
        if self.is_torn_down() || self.is_released() {
            return Err(ReferenceError::EngineTornDown(self.id()));
        }
        self.check_value(value)?;

        let ReferenceOptions {
            initial_refcount,
            ownership,
            finalizer,
            native_binding_size,
            cross_runtime,
        } = options;
        let is_async = finalizer.as_ref().is_some_and(|f| f.is_async());

        let mut state = self.inner.state.borrow_mut();
        let EngineState {
            heap, references, ..
        } = &mut *state;

        let kind = if cross_runtime {
            HandleKind::CrossRuntime
        } else {
            HandleKind::Local
        };
        let handle = heap.create_handle(value, kind)?;

        let accounting = Accounting::open(
            &self.inner.counters,
            finalizer.is_some(),
            is_async,
            ownership == Ownership::Runtime,
            self.is_main_context(),
        );
        heap.adjust_external_memory(native_binding_size as i64);

        let key = references.arena.insert(NativeReference {
            engine_id: self.id(),
            handle: Some(handle),
            ref_count: initial_refcount,
            ownership,
            is_async,
            cross_runtime,
            state: ReferenceState::for_refcount(initial_refcount),
            has_delete: false,
            finalizer,
            accounting,
            native_binding_size,
            links: Default::default(),
        });

        if initial_refcount == 0 {
            heap.make_weak(handle, key.to_token())?;
        }
        if ownership == Ownership::Runtime {
            references.manager.register(&mut references.arena, key);
        }

        tracing::trace!(
            engine = %self.id(),
            ?ownership,
            initial_refcount,
            is_async,
            cross_runtime,
            "reference created"
        );
        Ok(NativeRef::new(self.id(), key))
    }

    /// Increment the refcount; the handle turns strong when it leaves zero
    pub fn reference_ref(&self, reference: NativeRef) -> RefResult<u32> {
        let key = self.check_owner(reference)?;
        let mut state = self.inner.state.borrow_mut();
        let EngineState {
            heap, references, ..
        } = &mut *state;
        let r = references
            .arena
            .get_mut(key)
            .ok_or(ReferenceError::Stale(reference))?;
        if r.state == ReferenceState::Finalizing {
            return Err(ReferenceError::Finalizing(reference));
        }

        r.ref_count = r.ref_count.saturating_add(1);
        if r.ref_count == 1 {
            if let Some(handle) = r.handle {
                heap.make_strong(handle)?;
                r.state = ReferenceState::ActiveStrong;
            }
        }
        Ok(r.ref_count)
    }

    /// Decrement the refcount, clamping at zero; the handle turns weak when
    /// it reaches zero
    pub fn reference_unref(&self, reference: NativeRef) -> RefResult<u32> {
        let key = self.check_owner(reference)?;
        let mut state = self.inner.state.borrow_mut();
        let EngineState {
            heap, references, ..
        } = &mut *state;
        let r = references
            .arena
            .get_mut(key)
            .ok_or(ReferenceError::Stale(reference))?;
        if r.state == ReferenceState::Finalizing {
            return Err(ReferenceError::Finalizing(reference));
        }
        if r.ref_count == 0 {
            return Ok(0);
        }

        r.ref_count -= 1;
        if r.ref_count == 0 {
            if let Some(handle) = r.handle {
                heap.make_weak(handle, key.to_token())?;
                r.state = ReferenceState::ActiveWeak;
            }
        }
        Ok(r.ref_count)
    }

    /// Current value of the reference, `None` once it has been collected
    pub fn get_reference_value(&self, reference: NativeRef) -> RefResult<Option<Value>> {
        let key = self.check_owner(reference)?;
        let state = self.inner.state.borrow();
        let r = state
            .references
            .arena
            .get(key)
            .ok_or(ReferenceError::Stale(reference))?;
        Ok(r.handle.and_then(|h| state.heap.resolve(h)))
    }

    /// Snapshot of a reference's state
    pub fn reference_info(&self, reference: NativeRef) -> RefResult<ReferenceInfo> {
        let key = self.check_owner(reference)?;
        let state = self.inner.state.borrow();
        state
            .references
            .arena
            .get(key)
            .map(|r| r.info(&state.heap))
            .ok_or(ReferenceError::Stale(reference))
    }

    /// Destroy a reference
    ///
    /// Safe with a nonzero refcount. Deleting an already-deleted reference
    /// is a no-op, as is deleting from an engine that does not own it.
    pub fn delete_reference(&self, reference: NativeRef) -> RefResult<()> {
        if reference.engine_id() != self.id() {
            tracing::warn!(
                owner = %reference.engine_id(),
                engine = %self.id(),
                "delete_reference on foreign engine ignored"
            );
            return Ok(());
        }
        if self.is_released() {
            return Ok(());
        }
        self.destroy_reference(reference.key());
        Ok(())
    }

    /// Destructor shared by explicit deletion, teardown and self-deletion
    pub(crate) fn destroy_reference(&self, key: RefKey) {
        let needs_finalize = {
            let mut state = self.inner.state.borrow_mut();
            let EngineState {
                heap, references, ..
            } = &mut *state;
            let Some(r) = references.arena.get_mut(key) else {
                return;
            };
            if r.has_delete {
                return;
            }

            let owner_live = r.engine_id == self.id() && r.engine_id.is_live();
            if owner_live && r.accounting.is_non_callback() {
                r.accounting.settle(&self.inner.counters);
            }

            let runtime_owned = r.ownership == Ownership::Runtime;
            let cross_runtime = r.cross_runtime;
            let handle = r.handle.take();
            if handle.is_some() {
                r.has_delete = true;
            }

            if runtime_owned {
                references.manager.unregister(&mut references.arena, key);
            }

            match handle {
                None => {
                    references.arena.remove(key);
                    false
                }
                Some(handle) => {
                    let freed = if cross_runtime {
                        heap.free_cross_handle(handle)
                    } else {
                        heap.free_handle(handle)
                    };
                    if let Err(err) = freed {
                        tracing::warn!(engine = %self.id(), %err, "failed to free reference handle");
                    }
                    true
                }
            }
        };

        if needs_finalize {
            self.finalize(key, FinalizerState::Destruction);
            self.inner.state.borrow_mut().references.arena.remove(key);
        }
        self.release_if_ready();
    }

    fn check_owner(&self, reference: NativeRef) -> RefResult<RefKey> {
        if reference.engine_id() != self.id() {
            return Err(ReferenceError::ForeignEngine {
                owner: reference.engine_id(),
                engine: self.id(),
            });
        }
        if self.is_released() {
            return Err(ReferenceError::Stale(reference));
        }
        Ok(reference.key())
    }
}
