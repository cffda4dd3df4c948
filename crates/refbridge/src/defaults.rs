//! Default constants for engine and finalizer configuration.

use std::time::Duration;

/// Pending native binding size (bytes) above which the finalizer batch is
/// drained right after a collection instead of waiting for the next
/// explicit drain (500 MB).
pub const DEFAULT_FINALIZER_DRAIN_THRESHOLD: usize = 500 * 1024 * 1024;

/// How long an idle async finalizer worker parks before polling its queue.
pub const DEFAULT_ASYNC_WORKER_IDLE: Duration = Duration::from_millis(10);

/// Thread name prefix for async finalizer workers.
pub const ASYNC_WORKER_THREAD_PREFIX: &str = "refbridge-finalizer";
