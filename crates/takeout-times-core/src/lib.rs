pub mod error;
pub mod sidecar;
pub mod walk;
pub mod writer;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{FailureKind, SidecarError, SyncError};
pub use writer::{platform_writer, CreationTime, TimestampWriter};

/// Per-folder summary written by Takeout; never a per-asset sidecar.
pub const SENTINEL_FILENAME: &str = "metadata.json";

fn default_true() -> bool {
    true
}

fn default_sidecar_extension() -> String {
    ".json".to_string()
}

/// Where a sidecar's `title` is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaResolution {
    /// Beside the sidecar, as Takeout lays files out.
    #[default]
    SidecarDirectory,
    /// Relative to the process working directory. Legacy behaviour, opt-in only.
    WorkingDirectory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    pub roots: Vec<PathBuf>,
    /// Worker pool size; `None` or `0` means one per core.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Also set creation time where the platform supports it.
    #[serde(default = "default_true")]
    pub creation_time: bool,
    #[serde(default)]
    pub resolution: MediaResolution,
    #[serde(default = "default_sidecar_extension")]
    pub sidecar_extension: String,
}

impl SyncOptions {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            threads: None,
            creation_time: true,
            resolution: MediaResolution::default(),
            sidecar_extension: default_sidecar_extension(),
        }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_creation_time(mut self, creation_time: bool) -> Self {
        self.creation_time = creation_time;
        self
    }

    pub fn with_resolution(mut self, resolution: MediaResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_sidecar_extension(mut self, extension: impl Into<String>) -> Self {
        self.sidecar_extension = extension.into();
        self
    }
}

/// A media file whose timestamps now match its sidecar.
#[derive(Debug, Clone)]
pub struct SyncedFile {
    pub sidecar: PathBuf,
    pub media: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub creation_time: CreationTime,
}

/// One per attempted sidecar, plus one per directory that could not be listed.
#[derive(Debug)]
pub enum Outcome {
    Synced(SyncedFile),
    Failed(SyncError),
}

/// Invoked from worker threads, once per [`Outcome`], in no particular order.
/// May borrow from the caller for the duration of the walk.
pub type OutcomeCallback<'c> = dyn Fn(&Outcome) + Send + Sync + 'c;

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Directories successfully enumerated.
    pub directories: u64,
    /// Sidecar files attempted.
    pub sidecars: u64,
    /// Files fully synced.
    pub synced: u64,
    /// Synced files whose creation time could not be set on this platform.
    pub creation_time_unsupported: u64,
    pub failures: Vec<SyncError>,
}

impl SyncReport {
    pub fn count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Walk every root and sync media timestamps with the writer for this platform.
pub fn synchronize(
    options: &SyncOptions,
    callback: &OutcomeCallback<'_>,
) -> anyhow::Result<SyncReport> {
    let writer = writer::platform_writer(options.creation_time);
    synchronize_with_writer(options, writer.as_ref(), callback)
}

/// Same as [`synchronize`], with an explicit time-metadata writer.
pub fn synchronize_with_writer(
    options: &SyncOptions,
    writer: &dyn TimestampWriter,
    callback: &OutcomeCallback<'_>,
) -> anyhow::Result<SyncReport> {
    walk::Walker::new(options, writer, callback).run()
}
