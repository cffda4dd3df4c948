//! Per-engine reference counters
//!
//! An engine can only be released once every reference it created has been
//! settled. Three counters track the outstanding obligations:
//! - `non_callback`: references without a finalizer
//! - `callbackable`: references whose synchronous finalizer has not run yet
//! - `runtime_owned`: runtime-owned callbackable references of a secondary
//!   context, which must finish before the context is deleted

use std::sync::atomic::{AtomicUsize, Ordering};

/// Reference counters for an engine
#[derive(Debug, Default)]
pub struct ReferenceCounters {
    non_callback: AtomicUsize,
    callbackable: AtomicUsize,
    runtime_owned: AtomicUsize,
}

/// Point-in-time copy of [`ReferenceCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// References without a finalizer
    pub non_callback: usize,
    /// References with a pending synchronous finalizer
    pub callbackable: usize,
    /// Runtime-owned references counted against a secondary context
    pub runtime_owned: usize,
}

impl CounterSnapshot {
    /// Whether every counter is zero
    pub fn is_zero(&self) -> bool {
        self.non_callback == 0 && self.callbackable == 0 && self.runtime_owned == 0
    }
}

impl ReferenceCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// References without a finalizer
    pub fn non_callback(&self) -> usize {
        self.non_callback.load(Ordering::Relaxed)
    }

    /// References with a pending synchronous finalizer
    pub fn callbackable(&self) -> usize {
        self.callbackable.load(Ordering::Relaxed)
    }

    /// Runtime-owned callbackable references of a secondary context
    pub fn runtime_owned(&self) -> usize {
        self.runtime_owned.load(Ordering::Relaxed)
    }

    /// Copy all three counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            non_callback: self.non_callback(),
            callbackable: self.callbackable(),
            runtime_owned: self.runtime_owned(),
        }
    }

    /// Whether every counter is zero
    pub fn is_zero(&self) -> bool {
        self.snapshot().is_zero()
    }

    fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(counter: &AtomicUsize) {
        let prev = counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .unwrap_or(0);
        debug_assert!(prev > 0, "reference counter underflow");
    }
}

/// Which counter a reference opened at construction
///
/// Settling consumes the obligation, so a reference can decrement its
/// counter at most once no matter which path (destruction, batch drain,
/// context proxy, suppressed dispatch) reaches it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accounting {
    /// Nothing to settle: async finalizers, or already settled
    Untracked,
    /// Counted in `non_callback`
    NonCallback,
    /// Counted in `callbackable`, and in `runtime_owned` if set
    Callbackable { runtime_owned: bool },
}

impl Accounting {
    /// Open the obligation for a new reference
    pub(crate) fn open(
        counters: &ReferenceCounters,
        has_finalizer: bool,
        is_async: bool,
        runtime_owned: bool,
        is_main_context: bool,
    ) -> Self {
        match (has_finalizer, is_async) {
            (false, _) => {
                ReferenceCounters::increment(&counters.non_callback);
                Accounting::NonCallback
            }
            (true, true) => Accounting::Untracked,
            (true, false) => {
                ReferenceCounters::increment(&counters.callbackable);
                let runtime_owned = runtime_owned && !is_main_context;
                if runtime_owned {
                    ReferenceCounters::increment(&counters.runtime_owned);
                }
                Accounting::Callbackable { runtime_owned }
            }
        }
    }

    /// Settle the obligation, leaving `Untracked` behind
    pub(crate) fn settle(&mut self, counters: &ReferenceCounters) {
        match std::mem::replace(self, Accounting::Untracked) {
            Accounting::Untracked => {}
            Accounting::NonCallback => ReferenceCounters::decrement(&counters.non_callback),
            Accounting::Callbackable { runtime_owned } => {
                ReferenceCounters::decrement(&counters.callbackable);
                if runtime_owned {
                    ReferenceCounters::decrement(&counters.runtime_owned);
                }
            }
        }
    }

    pub(crate) fn is_non_callback(&self) -> bool {
        matches!(self, Accounting::NonCallback)
    }
}
