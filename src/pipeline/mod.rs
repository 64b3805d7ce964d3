//! Fallback conversion pipeline.
//!
//! A [`Pipeline`] holds an ordered list of [`ConversionStrategy`]s and tries
//! them one after another until one produces a non-empty JPEG.
//!
//! ## Data Flow
//!
//! ```text
//! stat source ──▶ mkdir output dir ──▶ tool ──✗──▶ preview ──✗──▶ AllStrategiesFailed
//!                                        │            │
//!                                        ✓            ✓
//!                                        └──▶ staging ──rename──▶ <key>.jpg
//! ```
//!
//! 1. [`tool`]: run the OS-native converter (`heif-dec`, `magick`, `sips`)
//!    with a hard timeout
//! 2. [`preview`]: scan the container for an embedded JPEG stream and write
//!    it out verbatim
//!
//! Strategies write into a staging file next to the final output. Only a
//! non-empty staging file is renamed onto the final path, so a reader never
//! sees a truncated JPEG and a failed strategy never leaves debris behind.

pub mod preview;
pub mod tool;

use crate::config::ConverterConfig;
use crate::error::{ConversionFailure, StrategyError};
use crate::notify::ConversionOutcome;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use preview::{find_embedded_jpeg, EmbeddedPreviewStrategy};
pub use tool::PlatformToolStrategy;

/// One way of turning a HEIC file into a JPEG.
///
/// Implementations write to `output` and return `Ok(())` when they believe
/// they produced an image; the pipeline double-checks that the file exists
/// and is non-empty.
pub trait ConversionStrategy: Send + Sync {
    /// Short identifier used in logs and failure reports.
    fn name(&self) -> &'static str;

    fn convert<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), StrategyError>>;
}

/// Ordered strategy list.
#[derive(Clone, Default)]
pub struct Pipeline {
    strategies: Vec<Arc<dyn ConversionStrategy>>,
}

impl Pipeline {
    pub fn new(strategies: Vec<Arc<dyn ConversionStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard pipeline: platform tool, then embedded preview, each
    /// included only when enabled in `config`.
    pub fn from_config(config: &ConverterConfig) -> Self {
        let mut strategies: Vec<Arc<dyn ConversionStrategy>> = Vec::new();
        if config.enable_platform_tool {
            strategies.push(Arc::new(PlatformToolStrategy::from_config(config)));
        }
        if config.enable_embedded_preview {
            strategies.push(Arc::new(EmbeddedPreviewStrategy));
        }
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Convert `source` into `output`.
    ///
    /// Never panics and never leaves a partial file at `output`.
    pub async fn run(&self, source: &Path, output: &Path) -> ConversionOutcome {
        // ── Step 1: the source must be a readable regular file ───────────────
        let meta = tokio::fs::metadata(source).await.map_err(|e| {
            ConversionFailure::SourceUnreadable {
                path: source.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        if !meta.is_file() {
            return Err(ConversionFailure::SourceUnreadable {
                path: source.to_path_buf(),
                detail: "not a regular file".into(),
            });
        }

        // ── Step 2: output directory ─────────────────────────────────────────
        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ConversionFailure::OutputUnwritable {
                    path: source.to_path_buf(),
                    detail: format!("{}: {}", dir.display(), e),
                }
            })?;
        }

        // ── Step 3: strategies in order ──────────────────────────────────────
        let staging = staging_path(output);
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let name = strategy.name();
            debug!("{}: trying {}", source.display(), name);

            let result = match strategy.convert(source, &staging).await {
                Ok(()) => promote(&staging, output).await.map_err(|detail| {
                    StrategyError::Failed {
                        strategy: name.to_string(),
                        detail,
                    }
                }),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!("Converted {} via {} → {}", source.display(), name, output.display());
                    return Ok(output.to_path_buf());
                }
                Err(e) => {
                    discard(&staging).await;
                    if let StrategyError::SourceIo { detail, .. } = &e {
                        return Err(ConversionFailure::SourceUnreadable {
                            path: source.to_path_buf(),
                            detail: detail.clone(),
                        });
                    }
                    debug!("{}: {}", source.display(), e);
                    attempts.push(e);
                }
            }
        }

        warn!(
            "All {} strategies failed for {}",
            attempts.len(),
            source.display()
        );
        Err(ConversionFailure::AllStrategiesFailed {
            path: source.to_path_buf(),
            attempts,
        })
    }
}

/// `<dir>/<stem>.part.jpg` next to the final output.
pub fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    output.with_file_name(format!("{stem}.part.jpg"))
}

/// Rename a finished staging file onto the final path, rejecting empty output.
async fn promote(staging: &Path, output: &Path) -> Result<(), String> {
    let len = tokio::fs::metadata(staging)
        .await
        .map(|m| m.len())
        .map_err(|e| format!("reported success but wrote nothing: {e}"))?;
    if len == 0 {
        return Err("produced an empty file".into());
    }
    tokio::fs::rename(staging, output)
        .await
        .map_err(|e| format!("cannot move output into place: {e}"))
}

async fn discard(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {}", staging.display(), e),
    }
}
