//! Async finalizer queue
//!
//! One queue per root engine (main or worker). Any engine under that root,
//! on any thread, can push finalizers for collected values whose callbacks
//! were marked asynchronous. A single consumer, normally an
//! [`AsyncFinalizerWorker`](super::AsyncFinalizerWorker), drains it.
//!
//! Entries never reference an engine, so they stay valid after the engine
//! that produced them is gone.

use super::{AsyncFinalizeFn, NativePtr};
use crossbeam::queue::SegQueue;
use crossbeam::sync::Unparker;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A finalizer waiting on the async queue
pub struct AsyncFinalizer {
    callback: AsyncFinalizeFn,
    data: NativePtr,
    hint: NativePtr,
    native_binding_size: usize,
}

impl AsyncFinalizer {
    /// Create a queue entry
    pub fn new(
        callback: AsyncFinalizeFn,
        data: NativePtr,
        hint: NativePtr,
        native_binding_size: usize,
    ) -> Self {
        Self {
            callback,
            data,
            hint,
            native_binding_size,
        }
    }

    /// Bytes of native memory this entry releases
    pub fn native_binding_size(&self) -> usize {
        self.native_binding_size
    }

    fn run(self) {
        (self.callback)(self.data, self.hint);
    }
}

impl std::fmt::Debug for AsyncFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFinalizer")
            .field("data", &self.data)
            .field("hint", &self.hint)
            .field("native_binding_size", &self.native_binding_size)
            .finish()
    }
}

/// Multi-producer queue of async finalizers
pub struct AsyncFinalizerQueue {
    /// Pending finalizers, FIFO
    entries: SegQueue<AsyncFinalizer>,

    /// Fast check for pending items
    pending_count: AtomicUsize,

    /// Native binding size of pending items
    pending_native_binding_size: AtomicUsize,

    /// Wakes the consumer thread, if one is attached
    waker: Mutex<Option<Unparker>>,
}

impl Default for AsyncFinalizerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncFinalizerQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            pending_native_binding_size: AtomicUsize::new(0),
            waker: Mutex::new(None),
        }
    }

    /// Queue a finalizer. Callable from any thread.
    pub fn push(&self, finalizer: AsyncFinalizer) {
        self.pending_native_binding_size
            .fetch_add(finalizer.native_binding_size, Ordering::AcqRel);
        // Counted before the push so a concurrent drain never underflows
        self.pending_count.fetch_add(1, Ordering::Release);
        self.entries.push(finalizer);

        tracing::trace!("Queued async finalizer (pending: {})", self.len());

        if let Some(waker) = self.waker.lock().as_ref() {
            waker.unpark();
        }
    }

    /// Check if there are pending finalizers
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    /// Number of pending finalizers
    #[inline]
    pub fn len(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Check if the queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Native binding size of pending finalizers
    pub fn pending_native_binding_size(&self) -> usize {
        self.pending_native_binding_size.load(Ordering::Acquire)
    }

    /// Run every pending finalizer in FIFO order on the calling thread
    ///
    /// Returns how many ran. Finalizers pushed while draining are picked up
    /// by the same call.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(finalizer) = self.entries.pop() {
            self.pending_count.fetch_sub(1, Ordering::Release);
            self.pending_native_binding_size
                .fetch_sub(finalizer.native_binding_size, Ordering::AcqRel);
            finalizer.run();
            count += 1;
        }

        if count > 0 {
            tracing::debug!("Ran {} async finalizers", count);
        }
        count
    }

    /// Attach or detach the consumer's waker
    pub(crate) fn set_waker(&self, waker: Option<Unparker>) {
        *self.waker.lock() = waker;
    }
}

impl std::fmt::Debug for AsyncFinalizerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFinalizerQueue")
            .field("pending_count", &self.len())
            .field(
                "pending_native_binding_size",
                &self.pending_native_binding_size(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::thread;

    fn recording(log: &Arc<StdMutex<Vec<usize>>>, size: usize) -> AsyncFinalizer {
        let log = Arc::clone(log);
        AsyncFinalizer::new(
            Box::new(move |data, _| log.lock().unwrap().push(data.addr())),
            NativePtr::from_addr(size),
            NativePtr::null(),
            size,
        )
    }

    #[test]
    fn test_queue_creation() {
        let queue = AsyncFinalizerQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_drain_is_fifo() {
        let queue = AsyncFinalizerQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for i in 1..=5 {
            queue.push(recording(&log, i));
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.pending_native_binding_size(), 15);

        assert_eq!(queue.drain(), 5);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
        assert_eq!(queue.pending_native_binding_size(), 0);
    }

    #[test]
    fn test_multiple_producers() {
        let queue = Arc::new(AsyncFinalizerQueue::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..25 {
                        queue.push(recording(&log, 1));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.drain(), 100);
        assert_eq!(log.lock().unwrap().len(), 100);
    }
}
