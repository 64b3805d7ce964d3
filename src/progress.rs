//! Progress-callback trait for queue and worker events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConverterConfigBuilder::progress_callback`] to observe
//! the service: tasks entering the queue, workers picking them up, outputs
//! landing in the cache.
//!
//! Events are delivered after the pool's internal lock has been released, so
//! an implementation may call back into the converter (e.g. to read
//! [`crate::HeicConverter::stats`]) without deadlocking.
//!
//! # Example
//!
//! ```rust
//! use edgequake_heic::{ConversionProgressCallback, ConverterConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, source: &Path, output: &Path) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} → {}", source.display(), output.display());
//!     }
//! }
//!
//! let config = ConverterConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the worker pool as tasks move through it.
///
/// Implementations must be `Send + Sync`: workers run on the Tokio thread
/// pool and report from whichever thread finished the job. All methods have
/// default no-op implementations so callers only override what they care
/// about.
pub trait ConversionProgressCallback: Send + Sync {
    /// A new task was created and appended to the queue.
    ///
    /// # Arguments
    /// * `source`: normalised source path
    /// * `queued`: queue length including this task
    fn on_task_queued(&self, source: &Path, queued: usize) {
        let _ = (source, queued);
    }

    /// A worker took the task off the queue.
    fn on_task_started(&self, source: &Path, worker: usize) {
        let _ = (source, worker);
    }

    /// The task produced `output`, which is now cached.
    fn on_task_complete(&self, source: &Path, output: &Path) {
        let _ = (source, output);
    }

    /// The task failed; `error` is the human-readable failure.
    fn on_task_failed(&self, source: &Path, error: &str) {
        let _ = (source, error);
    }

    /// A request was answered from the cache without creating a task.
    fn on_cache_hit(&self, source: &Path) {
        let _ = source;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
