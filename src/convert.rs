//! The conversion service façade.
//!
//! [`HeicConverter`] is what the media browser talks to. It answers
//! "what should I display for this file?" without ever blocking on a
//! conversion: a cached JPEG if one exists, otherwise a freshly drawn
//! placeholder while the worker pool converts in the background.
//!
//! ## Lifecycle
//!
//! ```text
//! new(config) ──▶ start() ──▶ get_displayable_image / convert_* ... ──▶ shutdown().await
//! ```
//!
//! `start()` is optional (the first request starts the pool) but surfaces a
//! missing Tokio runtime as an error instead of a silent placeholder.

use crate::config::ConverterConfig;
use crate::detect::is_heic_path;
use crate::error::HeicError;
use crate::notify::{ConversionHandle, Waiter};
use crate::paths::{normalize_source, OutputLayout};
use crate::pipeline::Pipeline;
use crate::placeholder::generate_placeholder;
use crate::pool::{PoolStats, Submission, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Background HEIC → JPEG conversion service with an in-memory cache.
///
/// # Example
/// ```rust,no_run
/// use edgequake_heic::{ConverterConfig, HeicConverter};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let converter = HeicConverter::new(ConverterConfig::default());
///     converter.start()?;
///
///     // Returns immediately: a placeholder now, the JPEG once converted.
///     let shown = converter.get_displayable_image("IMG_0001.HEIC");
///     println!("display {}", shown.display());
///
///     let jpeg = converter.convert_and_wait("IMG_0001.HEIC").await?;
///     println!("converted {}", jpeg.display());
///
///     converter.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct HeicConverter {
    config: ConverterConfig,
    layout: OutputLayout,
    pool: WorkerPool,
}

impl HeicConverter {
    /// Service with the standard strategy pipeline for `config`.
    pub fn new(config: ConverterConfig) -> Self {
        let pipeline = Pipeline::from_config(&config);
        Self::with_pipeline(config, pipeline)
    }

    /// Service with a custom pipeline (tests, or callers adding strategies).
    pub fn with_pipeline(config: ConverterConfig, pipeline: Pipeline) -> Self {
        let layout = OutputLayout::new(&config.work_dir);
        if let Err(e) = layout.ensure_dirs() {
            // Not fatal: placeholders degrade and the pipeline retries mkdir per task.
            warn!("Cannot prepare {}: {}", layout.root().display(), e);
        }
        let pool = WorkerPool::new(Arc::new(pipeline), layout.clone(), &config);
        Self {
            config,
            layout,
            pool,
        }
    }

    /// Start the worker pool on the current Tokio runtime. Idempotent.
    pub fn start(&self) -> Result<(), HeicError> {
        self.pool.start()
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Path the renderer should show for `source`, right now.
    ///
    /// * not HEIC → `source` unchanged; the pool and cache are not touched
    /// * converted and still on disk → the JPEG
    /// * otherwise → a placeholder card, with the conversion queued (or
    ///   joined, if one is already running)
    ///
    /// Never fails. A service that cannot accept work still gets a
    /// placeholder on screen; the reason is logged.
    pub fn get_displayable_image(&self, source: impl AsRef<Path>) -> PathBuf {
        let source = source.as_ref();
        if !is_heic_path(source) {
            return source.to_path_buf();
        }

        match self.pool.submit(source, None) {
            Ok(Submission::Cached(out)) => out,
            Ok(Submission::Pending(_)) => self.placeholder(source),
            Err(e) => {
                warn!("Conversion of {} not queued: {}", source.display(), e);
                self.placeholder(source)
            }
        }
    }

    /// Request a conversion and get told when it is done.
    ///
    /// Returns `Some(jpeg)` on a cache hit, `None` when the conversion is
    /// queued or already running. `on_complete` is invoked exactly once in
    /// every case: immediately for a cache hit or a rejected request, on
    /// completion otherwise. Non-HEIC sources are returned unchanged and
    /// `on_complete` receives that same path.
    pub fn convert_heic_file(
        &self,
        source: impl AsRef<Path>,
        on_complete: Option<Waiter>,
    ) -> Option<PathBuf> {
        let source = source.as_ref();
        if !is_heic_path(source) {
            if let Some(cb) = on_complete {
                cb(&Ok(source.to_path_buf()));
            }
            return Some(source.to_path_buf());
        }

        match self.pool.submit(source, on_complete) {
            Ok(Submission::Cached(out)) => Some(out),
            Ok(Submission::Pending(_)) => None,
            Err(e) => {
                warn!("Conversion of {} not queued: {}", source.display(), e);
                None
            }
        }
    }

    /// Request a conversion and get an awaitable handle.
    ///
    /// A cache hit yields an already-resolved handle. Non-HEIC sources
    /// resolve to themselves.
    pub fn convert(&self, source: impl AsRef<Path>) -> Result<ConversionHandle, HeicError> {
        let source = source.as_ref();
        if !is_heic_path(source) {
            return Ok(ConversionHandle::ready(
                source.to_path_buf(),
                Ok(source.to_path_buf()),
            ));
        }

        Ok(match self.pool.submit(source, None)? {
            Submission::Cached(out) => ConversionHandle::ready(normalize_source(source), Ok(out)),
            Submission::Pending(handle) => handle,
        })
    }

    /// Convert `source` and wait for the JPEG.
    pub async fn convert_and_wait(&self, source: impl AsRef<Path>) -> Result<PathBuf, HeicError> {
        let handle = self.convert(source)?;
        Ok(handle.wait().await?)
    }

    /// Convert `source` and copy the JPEG to `dest`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn convert_to_file(
        &self,
        source: impl AsRef<Path>,
        dest: impl AsRef<Path>,
    ) -> Result<PathBuf, HeicError> {
        let jpeg = self.convert_and_wait(source).await?;
        let dest = dest.as_ref();
        let write_err = |e| HeicError::OutputWriteFailed {
            path: dest.to_path_buf(),
            source: e,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = dest.with_extension("jpg.tmp");
        tokio::fs::copy(&jpeg, &tmp_path).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, dest).await.map_err(write_err)?;

        debug!("Copied {} → {}", jpeg.display(), dest.display());
        Ok(dest.to_path_buf())
    }

    /// Cached JPEG for `source`, without queueing anything.
    pub fn cached_output(&self, source: impl AsRef<Path>) -> Option<PathBuf> {
        self.pool.cached(source.as_ref())
    }

    /// Forget (and delete) the converted JPEG so the next request reconverts.
    pub fn invalidate(&self, source: impl AsRef<Path>) -> Option<PathBuf> {
        self.pool.invalidate(source.as_ref())
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop accepting work and wait for running conversions.
    ///
    /// Queued conversions fail with `PoolUnavailable`; every registered
    /// callback has run when this returns.
    pub async fn shutdown(self) {
        let stats = self.pool.stats();
        info!(
            "Shutting down converter ({} dispatched, {} cached)",
            stats.dispatched, stats.cached
        );
        self.pool.shutdown().await;
    }

    fn placeholder(&self, source: &Path) -> PathBuf {
        generate_placeholder(
            &normalize_source(source),
            &self.layout,
            self.config.placeholder_width,
            self.config.placeholder_height,
        )
    }
}

/// Synchronous one-shot conversion.
///
/// Creates a temporary tokio runtime internally; do not call from async code.
pub fn convert_file_sync(
    source: impl AsRef<Path>,
    config: ConverterConfig,
) -> Result<PathBuf, HeicError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| HeicError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    runtime.block_on(async move {
        let converter = HeicConverter::new(config);
        let result = converter.convert_and_wait(source).await;
        converter.shutdown().await;
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter_in(dir: &Path) -> HeicConverter {
        let config = ConverterConfig::builder()
            .work_dir(dir)
            .workers(1)
            .enable_platform_tool(false)
            .build()
            .unwrap();
        HeicConverter::new(config)
    }

    #[test]
    fn non_heic_passes_through_without_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let c = converter_in(dir.path());
        let p = Path::new("/photos/cat.png");
        assert_eq!(c.get_displayable_image(p), p);
        assert_eq!(c.stats(), PoolStats::default());
    }

    #[test]
    fn no_runtime_still_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let c = converter_in(dir.path());
        let shown = c.get_displayable_image("/photos/IMG_1.HEIC");
        assert!(shown.starts_with(c.layout().placeholder_dir()));
        assert!(shown.exists());
        assert!(matches!(c.start(), Err(HeicError::NoRuntime)));
    }

    #[test]
    fn callback_runs_for_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let c = converter_in(dir.path());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = seen.clone();
        let got = c.convert_heic_file(
            "/photos/doc.pdf",
            Some(Box::new(move |o| *s.lock().unwrap() = Some(o.clone()))),
        );
        assert_eq!(got, Some(PathBuf::from("/photos/doc.pdf")));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(Ok(PathBuf::from("/photos/doc.pdf")))
        );
    }

    #[tokio::test]
    async fn embedded_preview_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("IMG_2.HEIC");
        let mut bytes = b"....ftypheic".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0x42, 0xFF, 0xD9, 0x00]);
        std::fs::write(&src, &bytes).unwrap();

        let c = converter_in(&dir.path().join("work"));
        let jpeg = c.convert_and_wait(&src).await.unwrap();
        assert_eq!(
            std::fs::read(&jpeg).unwrap(),
            vec![0xFF, 0xD8, 0xFF, 0xE0, 0x42, 0xFF, 0xD9]
        );
        assert_eq!(c.get_displayable_image(&src), jpeg);
        assert_eq!(c.cached_output(&src), Some(jpeg.clone()));

        let copy = c.convert_to_file(&src, dir.path().join("out/copy.jpg")).await.unwrap();
        assert_eq!(std::fs::read(copy).unwrap(), std::fs::read(&jpeg).unwrap());

        c.shutdown().await;
    }
}
