use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::writer::{CreationTime, TimestampWriter};
use crate::{
    MediaResolution, Outcome, OutcomeCallback, SyncError, SyncOptions, SyncReport, SyncedFile,
    SENTINEL_FILENAME,
};

/// Concurrent directory walk: one rayon task per directory, run on a bounded pool.
///
/// A directory is listed before any of its children are spawned, and [`Walker::run`]
/// returns only after every transitively spawned task has finished.
pub struct Walker<'a> {
    options: &'a SyncOptions,
    writer: &'a dyn TimestampWriter,
    callback: &'a OutcomeCallback<'a>,
    directories: AtomicU64,
    sidecars: AtomicU64,
    synced: AtomicU64,
    creation_time_unsupported: AtomicU64,
    failures: Mutex<Vec<SyncError>>,
}

impl<'a> Walker<'a> {
    pub fn new(
        options: &'a SyncOptions,
        writer: &'a dyn TimestampWriter,
        callback: &'a OutcomeCallback<'a>,
    ) -> Self {
        Self {
            options,
            writer,
            callback,
            directories: AtomicU64::new(0),
            sidecars: AtomicU64::new(0),
            synced: AtomicU64::new(0),
            creation_time_unsupported: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn run(self) -> anyhow::Result<SyncReport> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("takeout-walk-{i}"));
        if let Some(threads) = self.options.threads.filter(|&n| n > 0) {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;

        info!(
            roots = self.options.roots.len(),
            threads = pool.current_num_threads(),
            creation_time = self.options.creation_time && self.writer.supports_creation_time(),
            "starting timestamp sync"
        );
        let started = Instant::now();

        let this = &self;
        pool.scope(|s| {
            for root in &this.options.roots {
                s.spawn(move |s| this.walk_dir(s, root.clone()));
            }
        });

        let report = self.into_report();
        info!(
            directories = report.directories,
            sidecars = report.sidecars,
            synced = report.synced,
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "timestamp sync finished"
        );
        Ok(report)
    }

    fn walk_dir<'s>(&'s self, scope: &rayon::Scope<'s>, dir: PathBuf) {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) => {
                self.report(Outcome::Failed(SyncError::UnreadableDirectory {
                    path: dir,
                    source,
                }));
                return;
            }
        };
        self.directories.fetch_add(1, Ordering::Relaxed);
        debug!(path = %dir.display(), "enumerating directory");

        for entry in entries {
            let (entry, file_type) = match entry.and_then(|e| e.file_type().map(|t| (e, t))) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if file_type.is_dir() {
                scope.spawn(move |s| self.walk_dir(s, path));
            } else if file_type.is_file() && self.is_sidecar(&entry.file_name()) {
                self.process_sidecar(&path);
            }
        }
    }

    fn is_sidecar(&self, name: &OsStr) -> bool {
        match name.to_str() {
            Some(name) => {
                name != SENTINEL_FILENAME && name.ends_with(self.options.sidecar_extension.as_str())
            }
            None => false,
        }
    }

    fn process_sidecar(&self, sidecar: &Path) {
        self.sidecars.fetch_add(1, Ordering::Relaxed);
        let outcome = match self.sync_sidecar(sidecar) {
            Ok(file) => Outcome::Synced(file),
            Err(err) => Outcome::Failed(err),
        };
        self.report(outcome);
    }

    fn sync_sidecar(&self, sidecar: &Path) -> Result<SyncedFile, SyncError> {
        let bytes = fs::read(sidecar).map_err(|source| SyncError::UnreadableSidecar {
            sidecar: sidecar.to_path_buf(),
            source,
        })?;
        let record = crate::sidecar::decode(&bytes)
            .map_err(|e| SyncError::from_sidecar(sidecar.to_path_buf(), e))?;

        let media = self
            .resolve_media(sidecar, &record.media_filename)
            .map_err(|media| SyncError::MissingAsset {
                sidecar: sidecar.to_path_buf(),
                media,
            })?;

        let at = record.captured_at;
        self.writer
            .set_access_and_modification(&media, at)
            .map_err(|source| SyncError::TimestampUpdate {
                sidecar: sidecar.to_path_buf(),
                media: media.clone(),
                source,
            })?;

        let creation_time = if self.options.creation_time {
            self.writer
                .set_creation(&media, at)
                .map_err(|source| SyncError::CreationTimeUpdate {
                    sidecar: sidecar.to_path_buf(),
                    media: media.clone(),
                    source,
                })?
        } else {
            CreationTime::Skipped
        };

        Ok(SyncedFile {
            sidecar: sidecar.to_path_buf(),
            media,
            captured_at: at,
            creation_time,
        })
    }

    /// Find the media file a sidecar names. On a miss, returns the path as written.
    ///
    /// Titles are NFC; some filesystems hand back NFD names, so both spellings are tried.
    fn resolve_media(&self, sidecar: &Path, filename: &str) -> Result<PathBuf, PathBuf> {
        let base = match self.options.resolution {
            MediaResolution::SidecarDirectory => sidecar.parent().unwrap_or(Path::new("")),
            MediaResolution::WorkingDirectory => Path::new(""),
        };

        let primary = base.join(filename);
        if primary.exists() {
            return Ok(primary);
        }

        let nfc: String = filename.nfc().collect();
        let nfd: String = filename.nfd().collect();
        for variant in [nfc, nfd] {
            if variant == filename {
                continue;
            }
            let candidate = base.join(&variant);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(primary)
    }

    fn report(&self, outcome: Outcome) {
        match &outcome {
            Outcome::Synced(file) => {
                self.synced.fetch_add(1, Ordering::Relaxed);
                if file.creation_time == CreationTime::Unsupported {
                    self.creation_time_unsupported.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    media = %file.media.display(),
                    captured_at = %file.captured_at.to_rfc3339(),
                    "updated file times"
                );
            }
            Outcome::Failed(err) => {
                warn!(path = %err.path().display(), kind = ?err.kind(), error = %err, "sync failed");
            }
        }

        (self.callback)(&outcome);

        if let Outcome::Failed(err) = outcome {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(err);
        }
    }

    fn into_report(self) -> SyncReport {
        SyncReport {
            directories: self.directories.into_inner(),
            sidecars: self.sidecars.into_inner(),
            synced: self.synced.into_inner(),
            creation_time_unsupported: self.creation_time_unsupported.into_inner(),
            failures: self
                .failures
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PartialWriter;
    use std::fs::File;
    use tempfile::tempdir;

    fn walker<'a>(options: &'a SyncOptions, callback: &'a OutcomeCallback<'a>) -> Walker<'a> {
        Walker::new(options, &PartialWriter, callback)
    }

    #[test]
    fn test_is_sidecar() {
        let options = SyncOptions::new(vec![]);
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        assert!(w.is_sidecar(OsStr::new("IMG_0001.jpg.json")));
        assert!(w.is_sidecar(OsStr::new("IMG_0001.jpg.supplemental-metadata.json")));
        assert!(!w.is_sidecar(OsStr::new("metadata.json")));
        assert!(!w.is_sidecar(OsStr::new("IMG_0001.jpg")));
        assert!(!w.is_sidecar(OsStr::new("notes.JSON")));
    }

    #[test]
    fn test_custom_sidecar_extension() {
        let options = SyncOptions::new(vec![]).with_sidecar_extension(".meta");
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        assert!(w.is_sidecar(OsStr::new("a.jpg.meta")));
        assert!(!w.is_sidecar(OsStr::new("a.jpg.json")));
    }

    #[test]
    fn test_resolve_media_beside_sidecar() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        File::create(sub.join("photo.jpg")).unwrap();
        File::create(dir.path().join("photo.jpg")).unwrap();

        let options = SyncOptions::new(vec![]);
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        let resolved = w
            .resolve_media(&sub.join("photo.jpg.json"), "photo.jpg")
            .unwrap();
        assert_eq!(resolved, sub.join("photo.jpg"));
    }

    #[test]
    fn test_resolve_media_nfd_fallback() {
        let dir = tempdir().unwrap();
        let nfc = "caf\u{e9}.jpg";
        let nfd = "cafe\u{301}.jpg";
        File::create(dir.path().join(nfd)).unwrap();

        let options = SyncOptions::new(vec![]);
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        let resolved = w
            .resolve_media(&dir.path().join("x.json"), nfc)
            .unwrap();
        assert!(resolved.exists());
    }

    #[test]
    fn test_resolve_media_miss_reports_primary_path() {
        let dir = tempdir().unwrap();
        let options = SyncOptions::new(vec![]);
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        let err = w
            .resolve_media(&dir.path().join("gone.jpg.json"), "gone.jpg")
            .unwrap_err();
        assert_eq!(err, dir.path().join("gone.jpg"));
    }

    #[test]
    fn test_resolve_media_working_directory_ignores_sidecar_dir() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("only-here-7f3a.jpg")).unwrap();

        let options =
            SyncOptions::new(vec![]).with_resolution(MediaResolution::WorkingDirectory);
        let noop = |_: &Outcome| {};
        let w = walker(&options, &noop);
        let err = w
            .resolve_media(&dir.path().join("only-here-7f3a.jpg.json"), "only-here-7f3a.jpg")
            .unwrap_err();
        assert_eq!(err, PathBuf::from("only-here-7f3a.jpg"));
    }

    #[test]
    fn test_unreadable_root_is_reported() {
        let dir = tempdir().unwrap();
        let options = SyncOptions::new(vec![dir.path().join("missing")]);
        let seen = Mutex::new(Vec::new());
        let callback = |o: &Outcome| {
            if let Outcome::Failed(e) = o {
                seen.lock().unwrap().push(e.kind());
            }
        };
        let report = walker(&options, &callback).run().unwrap();
        assert_eq!(report.directories, 0);
        assert_eq!(report.count(crate::FailureKind::UnreadableDirectory), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![crate::FailureKind::UnreadableDirectory]
        );
    }
}
