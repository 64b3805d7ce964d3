//! Error types for the edgequake-heic library.
//!
//! Three types reflect three distinct audiences:
//!
//! * [`HeicError`]: **Fatal** for the call that returned it: the service
//!   cannot accept work (no Tokio runtime, already shut down, bad config).
//!   Returned as `Err(HeicError)` from [`crate::HeicConverter`] methods.
//!
//! * [`ConversionFailure`]: **Per task**: one source file could not be
//!   converted. Delivered to every waiter of that task and never propagated
//!   further; the pool and all other tasks keep running.
//!
//! * [`StrategyError`]: **Per attempt**: one conversion strategy was
//!   unavailable or produced nothing. The pipeline collects these and moves
//!   on to the next strategy.
//!
//! `ConversionFailure` and `StrategyError` are `Clone` because a single
//! outcome is fanned out to an arbitrary number of waiters, and serialisable
//! so the CLI can emit them in its `--json` report.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-heic library.
#[derive(Debug, Error)]
pub enum HeicError {
    /// The worker pool must be started from inside a Tokio runtime.
    #[error("No Tokio runtime is running.\nCall HeicConverter::start() from within a runtime (e.g. #[tokio::main]).")]
    NoRuntime,

    /// `shutdown()` was called (or the converter was dropped); no new work is accepted.
    #[error("The conversion service has been shut down")]
    PoolShutDown,

    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `image` crate failed to encode a raster.
    #[error("Failed to encode image '{path}': {detail}")]
    ImageEncodeFailed { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The conversion ran and failed.
    #[error(transparent)]
    Conversion(#[from] ConversionFailure),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a single conversion task produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConversionFailure {
    /// The source file is missing or unreadable. Not retried.
    #[error("Cannot read source '{path}': {detail}")]
    SourceUnreadable { path: PathBuf, detail: String },

    /// The output directory could not be prepared.
    #[error("Cannot write output for '{path}': {detail}")]
    OutputUnwritable { path: PathBuf, detail: String },

    /// Every strategy was tried; none produced an image.
    #[error("No conversion strategy succeeded for '{path}' ({} tried)", .attempts.len())]
    AllStrategiesFailed {
        path: PathBuf,
        attempts: Vec<StrategyError>,
    },

    /// The worker running this task panicked or was killed.
    #[error("Worker crashed while converting '{path}': {detail}")]
    WorkerCrashed { path: PathBuf, detail: String },

    /// The pool was not running or shut down before the task was assigned.
    #[error("Conversion of '{path}' was not run: {reason}")]
    PoolUnavailable { path: PathBuf, reason: String },
}

impl ConversionFailure {
    /// The source path this failure belongs to.
    pub fn path(&self) -> &PathBuf {
        match self {
            ConversionFailure::SourceUnreadable { path, .. }
            | ConversionFailure::OutputUnwritable { path, .. }
            | ConversionFailure::AllStrategiesFailed { path, .. }
            | ConversionFailure::WorkerCrashed { path, .. }
            | ConversionFailure::PoolUnavailable { path, .. } => path,
        }
    }
}

/// A non-fatal error from one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StrategyError {
    /// The strategy cannot run here (tool missing, platform unsupported).
    #[error("{strategy}: unavailable: {reason}")]
    Unavailable { strategy: String, reason: String },

    /// The strategy ran but produced no usable output.
    #[error("{strategy}: failed: {detail}")]
    Failed { strategy: String, detail: String },

    /// An external tool exceeded its time budget and was killed.
    #[error("{strategy}: timed out after {millis}ms")]
    TimedOut { strategy: String, millis: u64 },

    /// Reading the source file itself failed. The pipeline stops on this one.
    #[error("{strategy}: cannot read source: {detail}")]
    SourceIo { strategy: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_strategies_failed_counts_attempts() {
        let e = ConversionFailure::AllStrategiesFailed {
            path: PathBuf::from("/photos/a.heic"),
            attempts: vec![
                StrategyError::Unavailable {
                    strategy: "platform-tool".into(),
                    reason: "heif-dec not found".into(),
                },
                StrategyError::Failed {
                    strategy: "embedded-preview".into(),
                    detail: "no JPEG markers".into(),
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 tried"), "got: {msg}");
        assert!(msg.contains("a.heic"));
    }

    #[test]
    fn failure_path_accessor() {
        let e = ConversionFailure::WorkerCrashed {
            path: PathBuf::from("/x.heic"),
            detail: "panic".into(),
        };
        assert_eq!(e.path(), &PathBuf::from("/x.heic"));
    }

    #[test]
    fn timed_out_display() {
        let e = StrategyError::TimedOut {
            strategy: "platform-tool".into(),
            millis: 30_000,
        };
        assert_eq!(e.to_string(), "platform-tool: timed out after 30000ms");
    }

    #[test]
    fn conversion_failure_wraps_into_heic_error() {
        let failure = ConversionFailure::SourceUnreadable {
            path: PathBuf::from("/gone.heic"),
            detail: "No such file".into(),
        };
        let e: HeicError = failure.clone().into();
        assert_eq!(e.to_string(), failure.to_string());
    }

    #[test]
    fn failures_serialise_for_reports() {
        let e = StrategyError::Failed {
            strategy: "embedded-preview".into(),
            detail: "nothing found".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("embedded-preview"));
        let back: StrategyError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
