//! # heic-tools
//!
//! Find the operating system's native HEIC/HEIF conversion utility and build
//! the command line that turns one `.heic` file into a JPEG.
//!
//! The crate does not run anything itself. Callers get a [`ConversionTool`]
//! (kind + absolute path) and ask it for [`ConversionTool::arguments`]; how the
//! process is spawned, timed out, or killed is up to them.
//!
//! ## Platform support
//!
//! | OS      | Candidates (first match wins)      | Package                     |
//! |---------|------------------------------------|-----------------------------|
//! | Linux   | `heif-dec`, `heif-convert`         | `libheif-examples`          |
//! | Windows | `magick.exe`                       | ImageMagick 7 with libheif  |
//! | macOS   | `sips`                             | built in (`/usr/bin/sips`)  |
//!
//! `heif-convert` was renamed to `heif-dec` in libheif 1.17; both are probed.
//!
//! ## Environment variable overrides
//!
//! - `HEIC_TOOL_PATH`: path to a specific converter binary. The tool kind is
//!   inferred from the file name; unknown names are invoked as
//!   `<tool> <input> <output>`.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable naming an explicit converter binary.
pub const TOOL_PATH_ENV: &str = "HEIC_TOOL_PATH";

/// JPEG quality used when the caller does not pick one.
pub const DEFAULT_QUALITY: u8 = 90;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while locating a conversion tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No native converter is known for this operating system.
    #[error("No HEIC converter is known for platform '{os}'")]
    UnsupportedPlatform { os: String },

    /// An explicit override was configured but the file does not exist.
    #[error("Configured HEIC converter '{path}' does not exist")]
    OverrideMissing { path: PathBuf },

    /// None of the platform candidates were found on the search path.
    #[error("No HEIC converter found on PATH (looked for: {})", .searched.join(", "))]
    NotFound { searched: Vec<String> },
}

// ── Tool kinds ───────────────────────────────────────────────────────────────

/// The command-line dialects this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// libheif >= 1.17 decoder: `heif-dec -q <Q> <in> <out>`.
    HeifDec,
    /// libheif < 1.17 decoder: `heif-convert -q <Q> <in> <out>`.
    HeifConvert,
    /// ImageMagick 7: `magick <in> -quality <Q> <out>`.
    ImageMagick,
    /// macOS Scriptable Image Processing System.
    Sips,
    /// Unknown binary from an override: `<tool> <in> <out>`.
    Generic,
}

impl ToolKind {
    /// Executable name without platform suffix.
    pub fn program(self) -> &'static str {
        match self {
            ToolKind::HeifDec => "heif-dec",
            ToolKind::HeifConvert => "heif-convert",
            ToolKind::ImageMagick => "magick",
            ToolKind::Sips => "sips",
            ToolKind::Generic => "converter",
        }
    }

    /// Guess the dialect from a binary's file name.
    pub fn from_file_name(path: &Path) -> ToolKind {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match stem.as_str() {
            "heif-dec" => ToolKind::HeifDec,
            "heif-convert" => ToolKind::HeifConvert,
            "magick" => ToolKind::ImageMagick,
            "sips" => ToolKind::Sips,
            _ => ToolKind::Generic,
        }
    }
}

/// Candidate tools for the current operating system, in probe order.
pub fn platform_candidates() -> Result<&'static [ToolKind], ToolError> {
    candidates_for(std::env::consts::OS)
}

fn candidates_for(os: &str) -> Result<&'static [ToolKind], ToolError> {
    match os {
        "linux" => Ok(&[ToolKind::HeifDec, ToolKind::HeifConvert]),
        "windows" => Ok(&[ToolKind::ImageMagick]),
        "macos" => Ok(&[ToolKind::Sips]),
        other => Err(ToolError::UnsupportedPlatform {
            os: other.to_string(),
        }),
    }
}

// ── Located tool ─────────────────────────────────────────────────────────────

/// A converter binary that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTool {
    pub kind: ToolKind,
    pub path: PathBuf,
}

impl ConversionTool {
    /// Arguments converting `input` into a JPEG at `output`.
    ///
    /// `quality` is clamped to 1–100. `sips` takes the quality as a
    /// `formatOptions` value; the libheif decoders and ImageMagick take `-q`
    /// and `-quality` respectively.
    pub fn arguments(&self, input: &Path, output: &Path, quality: u8) -> Vec<OsString> {
        let q = quality.clamp(1, 100).to_string();
        let input = input.as_os_str().to_os_string();
        let output = output.as_os_str().to_os_string();

        match self.kind {
            ToolKind::HeifDec | ToolKind::HeifConvert => {
                vec!["-q".into(), q.into(), input, output]
            }
            ToolKind::ImageMagick => vec![input, "-quality".into(), q.into(), output],
            ToolKind::Sips => vec![
                "-s".into(),
                "format".into(),
                "jpeg".into(),
                "-s".into(),
                "formatOptions".into(),
                q.into(),
                input,
                "--out".into(),
                output,
            ],
            ToolKind::Generic => vec![input, output],
        }
    }
}

// ── Locator ──────────────────────────────────────────────────────────────────

/// Probes for a converter binary.
///
/// The default locator reads `HEIC_TOOL_PATH` and `PATH` from the process
/// environment on every call, so a tool installed while the process runs is
/// picked up on the next probe.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    override_path: Option<PathBuf>,
    search_path: Option<OsString>,
    candidates: Option<Vec<ToolKind>>,
}

impl ToolLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this binary instead of probing. Takes precedence over `HEIC_TOOL_PATH`.
    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    /// Search these directories (same syntax as `PATH`) instead of `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Probe these kinds instead of the platform defaults.
    pub fn with_candidates(mut self, kinds: impl Into<Vec<ToolKind>>) -> Self {
        self.candidates = Some(kinds.into());
        self
    }

    /// Find a converter.
    ///
    /// Resolution order:
    /// 1. explicit override from [`ToolLocator::with_override`]
    /// 2. `HEIC_TOOL_PATH`
    /// 3. platform candidates on the search path
    pub fn locate(&self) -> Result<ConversionTool, ToolError> {
        let explicit = self
            .override_path
            .clone()
            .or_else(|| std::env::var_os(TOOL_PATH_ENV).map(PathBuf::from));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ToolError::OverrideMissing { path });
            }
            return Ok(ConversionTool {
                kind: ToolKind::from_file_name(&path),
                path,
            });
        }

        let candidates: Vec<ToolKind> = match &self.candidates {
            Some(kinds) => kinds.clone(),
            None => platform_candidates()?.to_vec(),
        };
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        for kind in &candidates {
            if let Some(path) = find_in_path(kind.program(), &search_path) {
                return Ok(ConversionTool { kind: *kind, path });
            }
        }

        Err(ToolError::NotFound {
            searched: candidates.iter().map(|k| k.program().to_string()).collect(),
        })
    }
}

/// Search every directory of `search_path` for an executable called `program`.
///
/// Extension guessing on Windows (`PATHEXT`) and the executable-bit check on
/// Unix are delegated to `which`.
pub fn find_in_path(program: &str, search_path: &OsStr) -> Option<PathBuf> {
    if search_path.is_empty() {
        return None;
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which::which_in(program, Some(search_path), cwd).ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(kind: ToolKind) -> ConversionTool {
        ConversionTool {
            kind,
            path: PathBuf::from("/usr/bin/x"),
        }
    }

    #[test]
    fn every_desktop_os_has_candidates() {
        assert_eq!(
            candidates_for("linux").unwrap(),
            &[ToolKind::HeifDec, ToolKind::HeifConvert]
        );
        assert_eq!(candidates_for("windows").unwrap(), &[ToolKind::ImageMagick]);
        assert_eq!(candidates_for("macos").unwrap(), &[ToolKind::Sips]);
        assert!(matches!(
            candidates_for("haiku"),
            Err(ToolError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn heif_arguments_put_quality_first() {
        let args = tool(ToolKind::HeifDec).arguments(Path::new("a.heic"), Path::new("b.jpg"), 85);
        assert_eq!(args, vec!["-q", "85", "a.heic", "b.jpg"]);
    }

    #[test]
    fn sips_arguments_use_out_flag() {
        let args = tool(ToolKind::Sips).arguments(Path::new("a.heic"), Path::new("b.jpg"), 90);
        assert_eq!(args[..3], ["-s", "format", "jpeg"]);
        assert_eq!(args[args.len() - 2], "--out");
        assert_eq!(args[args.len() - 1], "b.jpg");
    }

    #[test]
    fn quality_is_clamped() {
        let args = tool(ToolKind::ImageMagick).arguments(Path::new("a"), Path::new("b"), 0);
        assert_eq!(args, vec!["a", "-quality", "1", "b"]);
    }

    #[test]
    fn kind_is_inferred_from_file_name() {
        assert_eq!(ToolKind::from_file_name(Path::new("/opt/heif-dec")), ToolKind::HeifDec);
        assert_eq!(
            ToolKind::from_file_name(Path::new("/opt/im/magick.exe")),
            ToolKind::ImageMagick
        );
        assert_eq!(ToolKind::from_file_name(Path::new("/bin/other")), ToolKind::Generic);
    }

    #[test]
    fn missing_override_is_reported() {
        let err = ToolLocator::new()
            .with_override("/definitely/not/here/heif-dec")
            .locate()
            .unwrap_err();
        assert!(matches!(err, ToolError::OverrideMissing { .. }));
    }

    #[test]
    fn empty_search_path_finds_nothing() {
        let err = ToolLocator::new()
            .with_search_path("")
            .with_candidates(vec![ToolKind::HeifDec])
            .locate()
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::NotFound {
                searched: vec!["heif-dec".to_string()]
            }
        );
        assert!(err.to_string().contains("heif-dec"));
    }

    #[cfg(unix)]
    #[test]
    fn finds_executable_on_custom_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("heif-convert");
        std::fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = ToolLocator::new()
            .with_search_path(dir.path().as_os_str())
            .with_candidates(vec![ToolKind::HeifDec, ToolKind::HeifConvert])
            .locate()
            .unwrap();
        assert_eq!(found.kind, ToolKind::HeifConvert);
        assert_eq!(found.path, bin);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heif-dec"), "not a program").unwrap();
        assert!(find_in_path("heif-dec", dir.path().as_os_str()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn earlier_search_path_entry_wins() {
        use std::os::unix::fs::PermissionsExt;

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for dir in [&first, &second] {
            let bin = dir.path().join("heif-dec");
            std::fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let joined = std::env::join_paths([second.path(), first.path()]).unwrap();
        let found = find_in_path("heif-dec", &joined).unwrap();
        assert_eq!(found, second.path().join("heif-dec"));
    }
}
