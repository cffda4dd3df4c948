//! Finalizer dispatch
//!
//! Decides where a reference's finalizer runs once its value is gone:
//! - destruction runs it inline, on the destroying call
//! - collection of a synchronous finalizer posts it to the engine's batch,
//!   or to the parent's batch for a secondary context
//! - collection of an asynchronous finalizer posts it to the root queue
//!
//! A finalizer whose dispatch is suppressed (engine tearing down, parent
//! gone) is dropped without running, but its counters are still settled.

use super::{AsyncFinalizer, FinalizeCallback, Finalizer, FinalizerState, PendingFinalizer};
use crate::engine::counters::Accounting;
use crate::engine::Engine;
use crate::reference::{Ownership, ReferenceState, RefKey};

impl Engine {
    /// Finalize a reference exactly once
    ///
    /// Moves it through `Finalizing` into `Finalized`, running or
    /// dispatching its finalizer according to `reason`. Runtime-owned
    /// references free themselves afterwards unless a destructor is
    /// already doing so.
    pub(crate) fn finalize(&self, key: RefKey, reason: FinalizerState) {
        let (finalizer, mut accounting, delete_self, has_delete, size) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(reference) = state.references.arena.get_mut(key) else {
                return;
            };
            if reference.state.final_ran() {
                return;
            }
            reference.state = ReferenceState::Finalizing;

            let finalizer = reference.finalizer.take();
            let accounting = if finalizer.is_some() {
                std::mem::replace(&mut reference.accounting, Accounting::Untracked)
            } else {
                Accounting::Untracked
            };
            (
                finalizer,
                accounting,
                reference.delete_self(),
                reference.has_delete,
                reference.native_binding_size,
            )
        };

        match finalizer {
            Some(finalizer) if !self.is_in_destructor() => match reason {
                FinalizerState::Destruction => {
                    accounting.settle(&self.inner.counters);
                    tracing::trace!(engine = %self.id(), "running finalizer inline");
                    finalizer.invoke(self);
                }
                FinalizerState::Collection => {
                    self.dispatch_finalize_callback(finalizer, accounting, size);
                }
            },
            Some(_) => {
                tracing::warn!(engine = %self.id(), ?reason, "finalizer suppressed during teardown");
                accounting.settle(&self.inner.counters);
            }
            None => {}
        }

        {
            let mut state = self.inner.state.borrow_mut();
            state.heap.adjust_external_memory(-(size as i64));
            if let Some(reference) = state.references.arena.get_mut(key) {
                reference.state = ReferenceState::Finalized;
            }
        }

        if delete_self && !has_delete {
            self.destroy_reference(key);
        }
    }

    /// Route a collected reference's finalizer
    fn dispatch_finalize_callback(&self, finalizer: Finalizer, mut accounting: Accounting, size: usize) {
        let (callback, data, hint) = finalizer.into_parts();
        let callback = match callback {
            FinalizeCallback::Async(callback) => {
                // Async references never open a callbackable count
                accounting.settle(&self.inner.counters);
                self.inner
                    .async_queue
                    .push(AsyncFinalizer::new(callback, data, hint, size));
                return;
            }
            FinalizeCallback::Sync(callback) => callback,
        };

        let entry = PendingFinalizer {
            callback,
            data,
            hint,
            accounting,
            native_binding_size: size,
            origin: None,
        };

        if self.is_main_context() {
            self.inner.state.borrow_mut().finalizers.push(entry);
            return;
        }

        match self.parent() {
            Some(parent) if !parent.is_in_destructor() && !parent.is_released() => {
                tracing::trace!(engine = %self.id(), parent = %parent.id(), "finalizer posted to parent batch");
                parent.inner.state.borrow_mut().finalizers.push(PendingFinalizer {
                    origin: Some(self.clone()),
                    ..entry
                });
            }
            _ => {
                tracing::warn!(engine = %self.id(), "parent unavailable, finalizer dropped");
                self.abandon(entry);
            }
        }
    }

    /// Run every finalizer in this engine's batch, in FIFO order
    ///
    /// Entries posted by a context run with that context as their engine
    /// argument and settle the context's counters; a torn-down context is
    /// released once its last entry completes. A finalizer that tears this
    /// engine down stops the drain, and the entries after it are abandoned.
    /// Returns how many ran.
    pub fn run_pending_finalizers(&self) -> usize {
        if self.is_in_destructor() {
            return 0;
        }

        let pending = self.inner.state.borrow_mut().finalizers.take_all();
        if !pending.is_empty() {
            tracing::debug!(engine = %self.id(), count = pending.len(), "draining finalizer batch");
        }

        let mut ran = 0;
        let mut dropped = 0;
        for entry in pending {
            if self.is_in_destructor() || self.is_released() {
                self.abandon(entry);
                dropped += 1;
                continue;
            }
            let PendingFinalizer {
                callback,
                data,
                hint,
                mut accounting,
                origin,
                ..
            } = entry;
            match origin {
                None => {
                    callback(self, data, hint);
                    accounting.settle(&self.inner.counters);
                }
                Some(context) => {
                    callback(&context, data, hint);
                    accounting.settle(&context.inner.counters);
                    context.release_if_ready();
                }
            }
            ran += 1;
        }

        if dropped > 0 {
            tracing::warn!(engine = %self.id(), ran, dropped, "engine torn down mid-drain, finalizers dropped");
        }
        ran
    }

    /// Drain the batch early when enough native memory is waiting on it
    pub(crate) fn post_finalize_tasks(&self) {
        let owner = if self.is_main_context() {
            self.clone()
        } else {
            match self.parent() {
                Some(parent) => parent,
                None => return,
            }
        };
        if owner.is_in_destructor() || owner.is_released() {
            return;
        }

        let pending_size = owner.pending_native_binding_size();
        let options = owner.options();
        if options.drain_after_collection || pending_size > options.finalizer_drain_threshold {
            tracing::debug!(
                engine = %owner.id(),
                pending_size,
                threshold = options.finalizer_drain_threshold,
                "draining finalizer batch after collection"
            );
            owner.run_pending_finalizers();
        }
    }

    /// Detach a reference's finalizer without running it
    ///
    /// The reference's counters are settled as if the finalizer had run.
    /// Runtime-owned references are destroyed, since nothing else would
    /// ever free them. Returns false if there was no finalizer to detach.
    pub(crate) fn disarm_finalizer(&self, key: RefKey) -> bool {
        let runtime_owned = {
            let mut state = self.inner.state.borrow_mut();
            let Some(reference) = state.references.arena.get_mut(key) else {
                return false;
            };
            if reference.state.final_ran() || reference.finalizer.take().is_none() {
                return false;
            }
            reference.accounting.settle(&self.inner.counters);
            reference.ownership == Ownership::Runtime
        };

        if runtime_owned {
            self.destroy_reference(key);
        }
        true
    }
}
