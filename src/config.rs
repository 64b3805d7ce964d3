//! Configuration types for the background conversion service.
//!
//! All behaviour is controlled through [`ConverterConfig`], built via its
//! [`ConverterConfigBuilder`]. One struct for every knob keeps the CLI
//! mapping trivial and lets tests construct a service in a single expression.

use crate::error::HeicError;
use crate::placeholder;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the application-private directory under the system temp dir.
pub const WORK_DIR_NAME: &str = "edgequake-heic";

/// Configuration for a [`crate::HeicConverter`].
///
/// # Example
/// ```rust
/// use edgequake_heic::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .workers(2)
///     .tool_timeout_secs(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 2);
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Number of workers, fixed for the lifetime of the pool.
    /// Default: half the logical cores, at least 1.
    pub workers: usize,

    /// Root of the private output tree (`placeholders/` and `converted/`).
    /// Default: `<system temp>/edgequake-heic`.
    pub work_dir: PathBuf,

    /// Upper bound for one external converter invocation. Default: 30 s.
    ///
    /// External tools can hang on malformed input; without a bound a single
    /// bad file would occupy a worker forever.
    pub tool_timeout: Duration,

    /// Try the OS-native converter first. Default: true.
    pub enable_platform_tool: bool,

    /// Fall back to salvaging an embedded JPEG preview. Default: true.
    pub enable_embedded_preview: bool,

    /// Explicit converter binary; takes precedence over `HEIC_TOOL_PATH` and `PATH`.
    pub tool_override: Option<PathBuf>,

    /// JPEG quality passed to the external converter (1–100). Default: 90.
    pub jpeg_quality: u8,

    /// Placeholder width in pixels. Default: 400.
    pub placeholder_width: u32,

    /// Placeholder height in pixels. Default: 300.
    pub placeholder_height: u32,

    /// Adopt an output left on disk by a previous run instead of converting
    /// again, as long as it is not older than the source. Default: true.
    pub reuse_existing_outputs: bool,

    /// Observer for queue/worker events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            work_dir: std::env::temp_dir().join(WORK_DIR_NAME),
            tool_timeout: Duration::from_secs(30),
            enable_platform_tool: true,
            enable_embedded_preview: true,
            tool_override: None,
            jpeg_quality: heic_tools::DEFAULT_QUALITY,
            placeholder_width: 400,
            placeholder_height: 300,
            reuse_existing_outputs: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("workers", &self.workers)
            .field("work_dir", &self.work_dir)
            .field("tool_timeout", &self.tool_timeout)
            .field("enable_platform_tool", &self.enable_platform_tool)
            .field("enable_embedded_preview", &self.enable_embedded_preview)
            .field("tool_override", &self.tool_override)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("placeholder_width", &self.placeholder_width)
            .field("placeholder_height", &self.placeholder_height)
            .field("reuse_existing_outputs", &self.reuse_existing_outputs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Half the logical cores, minimum 1.
///
/// Conversions are a mix of process spawning and file I/O; leaving half the
/// machine idle keeps the rendering side of the application responsive.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout = Duration::from_secs(secs);
        self
    }

    pub fn enable_platform_tool(mut self, v: bool) -> Self {
        self.config.enable_platform_tool = v;
        self
    }

    pub fn enable_embedded_preview(mut self, v: bool) -> Self {
        self.config.enable_embedded_preview = v;
        self
    }

    pub fn tool_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tool_override = Some(path.into());
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.config.placeholder_width = width.clamp(placeholder::MIN_SIDE, placeholder::MAX_SIDE);
        self.config.placeholder_height = height.clamp(placeholder::MIN_SIDE, placeholder::MAX_SIDE);
        self
    }

    pub fn reuse_existing_outputs(mut self, v: bool) -> Self {
        self.config.reuse_existing_outputs = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, HeicError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(HeicError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.tool_timeout.is_zero() {
            return Err(HeicError::InvalidConfig(
                "Tool timeout must be greater than zero".into(),
            ));
        }
        if c.work_dir.as_os_str().is_empty() {
            return Err(HeicError::InvalidConfig("Work directory is empty".into()));
        }
        Ok(self.config)
    }
}
