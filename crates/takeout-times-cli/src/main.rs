use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use takeout_times_core::{MediaResolution, Outcome, SyncOptions};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser)]
#[command(name = "takeout-times", version, about = "Restore media file timestamps from Google Photos Takeout JSON sidecars")]
struct Cli {
    /// Root directories of the extracted Takeout export
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Worker threads (default: one per core)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Only set modification and access times
    #[arg(long)]
    no_creation_time: bool,

    /// Look media files up relative to the working directory instead of beside each sidecar
    #[arg(long)]
    resolve_from_cwd: bool,

    /// Sidecar file extension
    #[arg(long, default_value = ".json")]
    extension: String,

    /// Log every directory and file
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Do not print synced files
    #[arg(short, long)]
    quiet: bool,
}

/// Failures are already printed once per outcome; the log only adds detail on request.
fn log_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::ERROR
    }
}

/// Log sink that hides the spinner while a line is written, so the two never interleave.
#[derive(Clone)]
struct SpinnerWriter(ProgressBar);

/// Buffers one formatted event and flushes it to stderr on drop.
struct SpinnerLine {
    pb: ProgressBar,
    buf: Vec<u8>,
}

impl<'a> MakeWriter<'a> for SpinnerWriter {
    type Writer = SpinnerLine;

    fn make_writer(&'a self) -> Self::Writer {
        SpinnerLine {
            pb: self.0.clone(),
            buf: Vec::new(),
        }
    }
}

impl Write for SpinnerLine {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SpinnerLine {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let buf = std::mem::take(&mut self.buf);
            self.pb.suspend(|| {
                let _ = io::stderr().write_all(&buf);
            });
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let pb = ProgressBar::new_spinner();
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(SpinnerWriter(pb.clone()))
        .init();

    let mut roots = Vec::with_capacity(cli.roots.len());
    for root in &cli.roots {
        let abs = root
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", root.display()))?;
        if !abs.is_dir() {
            bail!("{} is not a directory", abs.display());
        }
        roots.push(abs);
    }

    let resolution = if cli.resolve_from_cwd {
        MediaResolution::WorkingDirectory
    } else {
        MediaResolution::SidecarDirectory
    };
    let options = SyncOptions::new(roots)
        .with_threads(cli.threads)
        .with_creation_time(!cli.no_creation_time)
        .with_resolution(resolution)
        .with_sidecar_extension(cli.extension);

    pb.set_style(ProgressStyle::with_template("{spinner} {pos} sidecars {msg}")?);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let quiet = cli.quiet;
    let result = takeout_times_core::synchronize(&options, &|outcome| {
        pb.inc(1);
        match outcome {
            Outcome::Synced(file) if !quiet => pb.println(format!(
                "✓ {} -> {}",
                file.media.display(),
                file.captured_at.to_rfc3339()
            )),
            Outcome::Synced(_) => {}
            Outcome::Failed(err) => pb.println(format!("✗ {err}")),
        }
    });
    pb.finish_and_clear();
    let report = result?;

    eprintln!(
        "Done! {} directories, {} sidecars, {} synced, {} failed ({:.2}s)",
        report.directories,
        report.sidecars,
        report.synced,
        report.failures.len(),
        t_total.elapsed().as_secs_f64()
    );
    if report.creation_time_unsupported > 0 {
        eprintln!(
            "Creation time is not settable on this platform; {} files got modification/access times only",
            report.creation_time_unsupported
        );
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
