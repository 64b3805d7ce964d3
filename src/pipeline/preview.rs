//! Embedded-preview strategy.
//!
//! HEIC files written by phones usually carry a full JPEG thumbnail or
//! preview next to the HEVC payload. Finding it needs no codec: scan for the
//! JPEG start-of-image marker and cut at the next end-of-image marker.
//!
//! The scan is deliberately naive. The first end marker after the start may
//! belong to a nested thumbnail inside the preview's EXIF block, which yields
//! a smaller but still valid JPEG.

use super::ConversionStrategy;
use crate::error::StrategyError;
use futures::future::{BoxFuture, FutureExt};
use std::path::Path;
use tracing::debug;

/// JPEG start-of-image followed by the first byte of the next marker.
pub const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// JPEG end-of-image.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const NAME: &str = "embedded-preview";

/// Locate the first embedded JPEG stream in `bytes`.
///
/// Returns the slice from the first [`SOI`] to the first [`EOI`] after it,
/// both markers included, or `None` when either marker is missing.
pub fn find_embedded_jpeg(bytes: &[u8]) -> Option<&[u8]> {
    let start = find(bytes, &SOI, 0)?;
    let end = find(bytes, &EOI, start + SOI.len())?;
    Some(&bytes[start..end + EOI.len()])
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Extracts the embedded JPEG and writes it verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedPreviewStrategy;

impl EmbeddedPreviewStrategy {
    async fn run(&self, source: &Path, output: &Path) -> Result<(), StrategyError> {
        let path = source.to_path_buf();

        // Whole-file read and linear scan: keep them off the async workers.
        let jpeg = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).map_err(|e| StrategyError::SourceIo {
                strategy: NAME.into(),
                detail: e.to_string(),
            })?;
            let total = bytes.len();
            match find_embedded_jpeg(&bytes) {
                Some(slice) => Ok(slice.to_vec()),
                None => Err(StrategyError::Failed {
                    strategy: NAME.into(),
                    detail: format!("no embedded JPEG in {total} bytes"),
                }),
            }
        })
        .await
        .map_err(|e| StrategyError::Failed {
            strategy: NAME.into(),
            detail: format!("scan task panicked: {e}"),
        })??;

        debug!("{}: {} byte preview found", source.display(), jpeg.len());

        tokio::fs::write(output, &jpeg)
            .await
            .map_err(|e| StrategyError::Failed {
                strategy: NAME.into(),
                detail: format!("cannot write {}: {}", output.display(), e),
            })
    }
}

impl ConversionStrategy for EmbeddedPreviewStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn convert<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), StrategyError>> {
        self.run(source, output).boxed()
    }
}
