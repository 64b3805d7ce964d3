//! OS-native converter strategy.
//!
//! Locates a converter with [`heic_tools::ToolLocator`] on every attempt
//! (so a tool installed while the service runs is picked up), runs it with
//! no console window and a hard timeout, and keeps the tail of its stderr
//! for the failure report.

use super::ConversionStrategy;
use crate::config::ConverterConfig;
use crate::error::StrategyError;
use futures::future::{BoxFuture, FutureExt};
use heic_tools::ToolLocator;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How much of the tool's stderr ends up in a failure message.
const STDERR_TAIL: usize = 400;

const NAME: &str = "platform-tool";

/// Runs `heif-dec` / `magick` / `sips` (or an override) on the source file.
#[derive(Debug, Clone)]
pub struct PlatformToolStrategy {
    locator: ToolLocator,
    timeout: Duration,
    quality: u8,
}

impl PlatformToolStrategy {
    pub fn new(locator: ToolLocator, timeout: Duration, quality: u8) -> Self {
        Self {
            locator,
            timeout,
            quality,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        let mut locator = ToolLocator::new();
        if let Some(path) = &config.tool_override {
            locator = locator.with_override(path);
        }
        Self::new(locator, config.tool_timeout, config.jpeg_quality)
    }

    async fn run(&self, source: &Path, output: &Path) -> Result<(), StrategyError> {
        let tool = self.locator.locate().map_err(|e| StrategyError::Unavailable {
            strategy: NAME.into(),
            reason: e.to_string(),
        })?;

        let mut cmd = Command::new(&tool.path);
        cmd.args(tool.arguments(source, output, self.quality))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_command(&mut cmd);

        debug!("Running {:?} on {}", tool.kind, source.display());

        // Dropping the future on timeout kills the child (kill_on_drop).
        let out = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(StrategyError::TimedOut {
                    strategy: NAME.into(),
                    millis: self.timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Err(StrategyError::Unavailable {
                    strategy: NAME.into(),
                    reason: format!("cannot start {}: {}", tool.path.display(), e),
                })
            }
            Ok(Ok(out)) => out,
        };

        if out.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(StrategyError::Failed {
            strategy: NAME.into(),
            detail: format!("{} exited with {}: {}", tool.kind.program(), out.status, tail(&stderr)),
        })
    }
}

impl ConversionStrategy for PlatformToolStrategy {
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

/// Keep GUI hosts from flashing a console window per conversion.
fn configure_command(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

/// Last [`STDERR_TAIL`] characters of `text`, trimmed.
fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL {
        return trimmed.to_string();
    }
    let skip = count - STDERR_TAIL;
    format!("…{}", trimmed.chars().skip(skip).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("  short\n"), "short");
        let long = "x".repeat(STDERR_TAIL) + "END";
        let t = tail(&long);
        assert!(t.ends_with("END"));
        assert_eq!(t.chars().count(), STDERR_TAIL + 1);
    }

    #[test]
    fn missing_override_is_unavailable() {
        let s = PlatformToolStrategy::new(
            ToolLocator::new().with_override("/definitely/not/here/heif-dec"),
            Duration::from_secs(5),
            90,
        );
        let dir = tempfile::tempdir().unwrap();
        let err = tokio_test::block_on(s.convert(
            &dir.path().join("a.heic"),
            &dir.path().join("a.jpg"),
        ))
        .unwrap_err();
        assert!(matches!(err, StrategyError::Unavailable { .. }), "{err:?}");
    }

    // `/bin/sh` as a generic tool runs `sh <source> <output>`: the source file
    // is the script, `$0` is its own path and `$1` the output.
    #[cfg(unix)]
    fn sh_strategy(timeout: Duration) -> PlatformToolStrategy {
        PlatformToolStrategy::new(ToolLocator::new().with_override("/bin/sh"), timeout, 90)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_tool_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("copy.heic");
        let out = dir.path().join("copy.jpg");
        std::fs::write(&src, "cp \"$0\" \"$1\"\n").unwrap();

        sh_strategy(Duration::from_secs(10))
            .convert(&src, &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), std::fs::read(&src).unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bad.heic");
        std::fs::write(&src, "echo 'corrupt header' >&2\nexit 3\n").unwrap();

        let err = sh_strategy(Duration::from_secs(10))
            .convert(&src, &dir.path().join("bad.jpg"))
            .await
            .unwrap_err();
        match err {
            StrategyError::Failed { detail, .. } => assert!(detail.contains("corrupt header"), "{detail}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("slow.heic");
        std::fs::write(&src, "exec sleep 30\n").unwrap();

        let started = std::time::Instant::now();
        let err = sh_strategy(Duration::from_millis(200))
            .convert(&src, &dir.path().join("slow.jpg"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StrategyError::TimedOut {
                strategy: NAME.into(),
                millis: 200
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
