//! CLI binary for edgequake-heic.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig`, converts every input through the worker pool and
//! prints where the JPEGs ended up.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_heic::{
    is_heic_path, ConversionFailure, ConversionProgressCallback, ConverterConfig, HeicConverter,
    OutputLayout, PoolStats, ProgressCallback,
};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the whole batch plus a log line
/// per finished file. Files finish out of order; the bar only counts.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-file wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<PathBuf, Instant>>,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, source: &Path) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| p.display().to_string())
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_task_started(&self, source: &Path, worker: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_path_buf(), Instant::now());
        self.bar
            .set_message(format!("{} (worker {worker})", file_name(source)));
    }

    fn on_task_complete(&self, source: &Path, _output: &Path) {
        self.bar.println(format!(
            "  {} {:<40}  {}",
            green("✓"),
            file_name(source),
            self.elapsed(source)
        ));
        self.bar.inc(1);
    }

    fn on_task_failed(&self, source: &Path, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            file_name(source),
            red(&msg),
            self.elapsed(source)
        ));
        self.bar.inc(1);
    }

    fn on_cache_hit(&self, source: &Path) {
        self.bar.println(format!(
            "  {} {:<40}  {}",
            cyan("◆"),
            file_name(source),
            dim("already converted")
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two photos (JPEG paths printed on stdout)
  heic2jpg IMG_0001.HEIC IMG_0002.HEIC

  # Every HEIC/HEIF file in a folder, copied next to each other
  heic2jpg ~/Pictures/iphone --copy-to ~/Pictures/jpeg

  # Four workers, 10 s per tool run, embedded preview only
  heic2jpg -w 4 --tool-timeout 10 --no-platform-tool photos/

  # Machine-readable report
  heic2jpg --json --stats photos/ > report.json

  # Just draw the "converting" cards
  heic2jpg --placeholder-only photos/

PLATFORM TOOLS (probed in order, first found wins):
  Linux     heif-dec, heif-convert   (libheif-examples)
  Windows   magick                   (ImageMagick 7)
  macOS     sips                     (built in)

  When no tool is found, or it fails, the JPEG preview embedded in most
  phone HEIC files is extracted instead.

ENVIRONMENT VARIABLES:
  HEIC_TOOL_PATH   Use this converter binary instead of probing PATH
  RUST_LOG         Override log filtering (e.g. RUST_LOG=edgequake_heic=debug)
"#;

/// Convert HEIC/HEIF photos to JPEG.
#[derive(Parser, Debug)]
#[command(
    name = "heic2jpg",
    version,
    about = "Convert HEIC/HEIF photos to JPEG in the background worker pool",
    long_about = "Convert HEIC/HEIF photos to JPEG using the OS-native converter \
(heif-dec, ImageMagick, sips) with a fallback that salvages the embedded JPEG preview. \
Conversions run on a fixed worker pool; each distinct file is converted once.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HEIC/HEIF files, or directories to scan (not recursive).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Root of the output tree (placeholders/ and converted/).
    #[arg(long, env = "HEIC2JPG_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Number of conversion workers. Default: half the logical cores.
    #[arg(short, long, env = "HEIC2JPG_WORKERS")]
    workers: Option<usize>,

    /// Seconds before a hung converter process is killed.
    #[arg(long, env = "HEIC2JPG_TOOL_TIMEOUT", default_value_t = 30)]
    tool_timeout: u64,

    /// JPEG quality passed to the converter (1–100).
    #[arg(long, env = "HEIC2JPG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Converter binary to use instead of probing PATH.
    #[arg(long, env = "HEIC2JPG_TOOL")]
    tool: Option<PathBuf>,

    /// Skip the OS-native converter.
    #[arg(long, env = "HEIC2JPG_NO_PLATFORM_TOOL")]
    no_platform_tool: bool,

    /// Skip embedded-preview extraction.
    #[arg(long, env = "HEIC2JPG_NO_EMBEDDED_PREVIEW")]
    no_embedded_preview: bool,

    /// Convert again even when a previous run left a JPEG behind.
    #[arg(long, env = "HEIC2JPG_FORCE")]
    force: bool,

    /// Also copy each JPEG into this directory as <stem>.jpg.
    #[arg(long, env = "HEIC2JPG_COPY_TO")]
    copy_to: Option<PathBuf>,

    /// Only draw placeholder cards; do not convert.
    #[arg(long)]
    placeholder_only: bool,

    /// Output a JSON report instead of plain paths.
    #[arg(long, env = "HEIC2JPG_JSON")]
    json: bool,

    /// Print pool statistics after the batch.
    #[arg(long, env = "HEIC2JPG_STATS")]
    stats: bool,

    /// Disable progress bar.
    #[arg(long, env = "HEIC2JPG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HEIC2JPG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HEIC2JPG_QUIET")]
    quiet: bool,
}

/// One line of the `--json` report.
#[derive(Debug, Serialize)]
struct FileReport {
    source: PathBuf,
    output: Option<PathBuf>,
    copied_to: Option<PathBuf>,
    error: Option<ConversionFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    copy_error: Option<String>,
}

impl FileReport {
    fn failed(&self) -> bool {
        self.error.is_some() || self.copy_error.is_some()
    }
}

#[derive(Debug, Serialize)]
struct BatchReport {
    files: Vec<FileReport>,
    converted: usize,
    failed: usize,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<PoolStats>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.placeholder_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Collect inputs ───────────────────────────────────────────────────
    let inputs = collect_inputs(&cli.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("No HEIC/HEIF files found in the given inputs");
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = if show_progress {
        Some(CliProgressCallback::new(inputs.len()))
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ConversionProgressCallback>),
    )?;

    // ── Placeholder-only mode ────────────────────────────────────────────
    if cli.placeholder_only {
        let layout = OutputLayout::new(&config.work_dir);
        for source in &inputs {
            let card = edgequake_heic::generate_placeholder(
                source,
                &layout,
                config.placeholder_width,
                config.placeholder_height,
            );
            println!("{}", card.display());
        }
        return Ok(());
    }

    // ── Run conversions ──────────────────────────────────────────────────
    let started = Instant::now();
    let converter = HeicConverter::new(config);
    converter
        .start()
        .context("Failed to start conversion workers")?;

    let handles = inputs
        .iter()
        .map(|source| converter.convert(source))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to queue conversions")?;
    let outcomes = join_all(handles.iter().map(|h| h.wait())).await;

    if let Some(cb) = &progress {
        cb.finish();
    }

    let mut files = Vec::with_capacity(inputs.len());
    let mut copy_names = CopyNames::default();
    for (source, outcome) in inputs.iter().zip(outcomes) {
        let mut report = FileReport {
            source: source.clone(),
            output: None,
            copied_to: None,
            error: None,
            copy_error: None,
        };
        match outcome {
            Ok(jpeg) => {
                if let Some(dir) = &cli.copy_to {
                    let dest = dir.join(copy_names.claim(source));
                    match converter.convert_to_file(source, &dest).await {
                        Ok(copied) => report.copied_to = Some(copied),
                        Err(e) => {
                            tracing::warn!("Failed to copy JPEG to {}: {}", dest.display(), e);
                            report.copy_error = Some(e.to_string());
                        }
                    }
                }
                report.output = Some(jpeg);
            }
            Err(e) => report.error = Some(e),
        }
        files.push(report);
    }

    let failed = files.iter().filter(|f| f.failed()).count();
    let report = BatchReport {
        converted: files.len() - failed,
        failed,
        files,
        duration_ms: started.elapsed().as_millis(),
        stats: cli.stats.then(|| converter.stats()),
    };
    converter.shutdown().await;

    // ── Print results ────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else {
        print_plain(&report, cli.quiet);
    }

    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} conversions failed",
            report.failed,
            report.failed + report.converted
        );
    }
    Ok(())
}

fn print_plain(report: &BatchReport, quiet: bool) {
    for f in &report.files {
        match (&f.output, &f.error, &f.copy_error) {
            (Some(_), _, Some(e)) if !quiet => {
                eprintln!("{} {}: {}", red("✗"), f.source.display(), e)
            }
            (Some(out), _, None) => println!("{}", f.copied_to.as_ref().unwrap_or(out).display()),
            (None, Some(e), _) if !quiet => eprintln!("{} {}", red("✗"), e),
            _ => {}
        }
    }

    if quiet {
        return;
    }
    eprintln!(
        "{}  {}/{} files  {}ms",
        if report.failed == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        report.converted,
        report.converted + report.failed,
        report.duration_ms,
    );
    if let Some(s) = &report.stats {
        eprintln!(
            "   {}",
            dim(&format!(
                "{} workers  {} dispatched  {} cached",
                s.workers, s.dispatched, s.cached
            ))
        );
    }
    if let Some(first) = report.files.first() {
        if let Some(out) = &first.output {
            if let Some(dir) = out.parent() {
                eprintln!("   {}", bold(&dir.display().to_string()));
            }
        }
    }
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .tool_timeout_secs(cli.tool_timeout)
        .jpeg_quality(cli.quality)
        .enable_platform_tool(!cli.no_platform_tool)
        .enable_embedded_preview(!cli.no_embedded_preview)
        .reuse_existing_outputs(!cli.force);

    if let Some(n) = cli.workers {
        builder = builder.workers(n);
    }
    if let Some(dir) = &cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(tool) = &cli.tool {
        builder = builder.tool_override(tool);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Expand directories (one level) and drop duplicates and non-HEIC files.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen = BTreeSet::new();
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_heic_path(p))
                .collect();
            found.sort();
            for p in found {
                if seen.insert(edgequake_heic::paths::normalize_source(&p)) {
                    files.push(p);
                }
            }
        } else if is_heic_path(input) {
            if seen.insert(edgequake_heic::paths::normalize_source(input)) {
                files.push(input.clone());
            }
        } else {
            tracing::warn!("Skipping {}: not a HEIC/HEIF file", input.display());
        }
    }
    Ok(files)
}

/// File names for `--copy-to`, unique within one batch.
///
/// `IMG_0001.HEIC` → `IMG_0001.jpg`; a second `IMG_0001` (another folder, or
/// a `.heif` twin) becomes `IMG_0001-2.jpg`. Names are compared
/// case-insensitively so the result is also unique on macOS and Windows.
#[derive(Debug, Default)]
struct CopyNames {
    taken: HashSet<String>,
}

impl CopyNames {
    fn claim(&mut self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());

        let mut name = format!("{stem}.jpg");
        let mut n = 1;
        while !self.taken.insert(name.to_lowercase()) {
            n += 1;
            name = format!("{stem}-{n}.jpg");
        }
        PathBuf::from(name)
    }
}
