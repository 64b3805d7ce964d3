//! # edgequake-heic
//!
//! Background HEIC/HEIF → JPEG conversion for media browsers.
//!
//! ## Why this crate?
//!
//! Image widgets cannot draw HEIC, and converting one can take anything from
//! milliseconds to seconds depending on which tool the machine happens to
//! have. A browser scrolling through a folder of phone photos must not stall
//! on that. This crate answers "what do I display for this file?" instantly
//! (a cached JPEG, or a placeholder card) and does the real conversion on a
//! bounded worker pool, once per file no matter how often it is asked for.
//!
//! ## Pipeline Overview
//!
//! ```text
//! get_displayable_image(path)
//!  │
//!  ├─ 1. Detect   not .heic/.heif → return path unchanged
//!  ├─ 2. Cache    converted JPEG still on disk → return it
//!  ├─ 3. Queue    join the in-flight task, or enqueue a new one (FIFO)
//!  ├─ 4. Show     draw a 400×300 "CONVERTING" placeholder, return it
//!  └─ 5. Convert  worker runs the fallback pipeline:
//!                   platform tool (heif-dec / magick / sips, 30 s timeout)
//!                   → embedded JPEG preview salvage
//!                 result is cached and every waiter is notified
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_heic::{ConverterConfig, HeicConverter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = HeicConverter::new(ConverterConfig::default());
//!     converter.start()?;
//!
//!     // Instant: placeholder now, JPEG on later calls.
//!     let shown = converter.get_displayable_image("IMG_0001.HEIC");
//!
//!     // Or be told when it is done.
//!     converter.convert_heic_file(
//!         "IMG_0002.HEIC",
//!         Some(Box::new(|outcome| match outcome {
//!             Ok(jpeg) => println!("ready: {}", jpeg.display()),
//!             Err(e) => eprintln!("failed: {e}"),
//!         })),
//!     );
//!
//!     converter.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `heic2jpg` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-heic = { version = "0.1", default-features = false }
//! ```
//!
//! ## Platform tools
//!
//! | OS | Tool probed | Package |
//! |----|-------------|---------|
//! | Linux | `heif-dec`, then `heif-convert` | `libheif-examples` |
//! | Windows | `magick` | ImageMagick 7 |
//! | macOS | `sips` | built in |
//!
//! Set `HEIC_TOOL_PATH` (or [`ConverterConfigBuilder::tool_override`]) to use
//! a specific binary.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod detect;
pub mod error;
pub mod notify;
pub mod paths;
pub mod pipeline;
pub mod placeholder;
pub mod pool;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{default_worker_count, ConverterConfig, ConverterConfigBuilder};
pub use convert::{convert_file_sync, HeicConverter};
pub use detect::{is_heic_path, HEIC_EXTENSIONS};
pub use error::{ConversionFailure, HeicError, StrategyError};
pub use notify::{ConversionHandle, ConversionOutcome, Waiter};
pub use paths::OutputLayout;
pub use pipeline::{ConversionStrategy, Pipeline};
pub use placeholder::generate_placeholder;
pub use pool::{PoolStats, Submission, WorkerPool};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
