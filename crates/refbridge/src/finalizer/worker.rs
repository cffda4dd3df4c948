//! Worker thread that drains an async finalizer queue

use super::AsyncFinalizerQueue;
use crate::defaults::{ASYNC_WORKER_THREAD_PREFIX, DEFAULT_ASYNC_WORKER_IDLE};
use crossbeam::sync::{Parker, Unparker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

/// Background thread that runs async finalizers
///
/// The worker parks until the queue wakes it (or the idle interval
/// elapses), then drains everything pending. Stopping the worker drains the
/// queue one last time before the thread exits.
pub struct AsyncFinalizerWorker {
    /// Worker ID
    id: usize,

    /// Queue being drained
    queue: Arc<AsyncFinalizerQueue>,

    /// Park timeout between polls
    idle_interval: Duration,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,

    /// Wakes the worker thread
    unparker: Option<Unparker>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl AsyncFinalizerWorker {
    /// Create a worker for `queue` with the default idle interval
    pub fn new(queue: Arc<AsyncFinalizerQueue>) -> Self {
        Self::with_idle_interval(queue, DEFAULT_ASYNC_WORKER_IDLE)
    }

    /// Create a worker for `queue`
    pub fn with_idle_interval(queue: Arc<AsyncFinalizerQueue>, idle_interval: Duration) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            queue,
            idle_interval,
            handle: None,
            unparker: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create and start a worker
    pub fn spawn(queue: Arc<AsyncFinalizerQueue>) -> Self {
        let mut worker = Self::new(queue);
        worker.start();
        worker
    }

    /// Start the worker thread
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.shutdown.store(false, Ordering::Release);

        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        self.queue.set_waker(Some(unparker.clone()));
        self.unparker = Some(unparker);

        let queue = Arc::clone(&self.queue);
        let shutdown = Arc::clone(&self.shutdown);
        let idle = self.idle_interval;

        let handle = thread::Builder::new()
            .name(format!("{}-{}", ASYNC_WORKER_THREAD_PREFIX, self.id))
            .spawn(move || Self::run_loop(queue, parker, shutdown, idle))
            .expect("Failed to spawn async finalizer thread");

        tracing::debug!(worker = self.id, "async finalizer worker started");
        self.handle = Some(handle);
    }

    /// Stop the worker thread and wait for it to finish
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(unparker) = self.unparker.take() {
            unparker.unpark();
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(worker = self.id, "async finalizer worker panicked");
            }
            self.queue.set_waker(None);
            tracing::debug!(worker = self.id, "async finalizer worker stopped");
        }
    }

    /// Whether the worker thread is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Queue this worker drains
    pub fn queue(&self) -> &Arc<AsyncFinalizerQueue> {
        &self.queue
    }

    fn run_loop(
        queue: Arc<AsyncFinalizerQueue>,
        parker: Parker,
        shutdown: Arc<AtomicBool>,
        idle: Duration,
    ) {
        loop {
            queue.drain();

            if shutdown.load(Ordering::Acquire) {
                // Anything pushed between the drain and the flag
                queue.drain();
                break;
            }

            parker.park_timeout(idle);
        }
    }
}

impl Drop for AsyncFinalizerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AsyncFinalizerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFinalizerWorker")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("queue", &self.queue)
            .finish()
    }
}
