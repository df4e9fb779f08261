use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;
/// 100ns intervals per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// A Windows `FILETIME`: 100ns ticks since 1601-01-01, split into 32-bit words.
///
/// Instants before 1601, or past the largest tick count `SetFileTime` accepts, are not
/// representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFileTime {
    pub low: u32,
    pub high: u32,
}

impl NativeFileTime {
    pub fn from_datetime(at: DateTime<Utc>) -> Option<Self> {
        let seconds = u64::try_from(at.timestamp().checked_add(FILETIME_EPOCH_OFFSET)?).ok()?;
        let ticks = seconds
            .checked_mul(TICKS_PER_SECOND)?
            .checked_add(u64::from(at.timestamp_subsec_nanos()) / 100)?;
        // The top bit must be clear.
        if ticks > i64::MAX as u64 {
            return None;
        }
        Some(Self::from_ticks(ticks))
    }

    pub fn from_ticks(ticks: u64) -> Self {
        Self {
            low: (ticks & 0xFFFF_FFFF) as u32,
            high: (ticks >> 32) as u32,
        }
    }

    pub fn ticks(self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low)
    }
}

/// What happened to the creation time of a synced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationTime {
    Updated,
    /// The platform (or the chosen writer) has no creation-time primitive.
    Unsupported,
    /// Creation time was turned off in the options, so it was not attempted.
    Skipped,
}

/// Applies a capture instant to a file's time metadata.
///
/// Selected once per run by [`platform_writer`] and shared by every worker.
pub trait TimestampWriter: Send + Sync {
    /// Set access and modification time together in a single call.
    fn set_access_and_modification(&self, path: &Path, at: DateTime<Utc>) -> io::Result<()>;

    /// Set creation time, or report that it cannot be set here.
    fn set_creation(&self, path: &Path, at: DateTime<Utc>) -> io::Result<CreationTime>;

    fn supports_creation_time(&self) -> bool {
        false
    }
}

/// Access and modification times only. Used wherever creation time is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct PartialWriter;

impl TimestampWriter for PartialWriter {
    fn set_access_and_modification(&self, path: &Path, at: DateTime<Utc>) -> io::Result<()> {
        let ft = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
        filetime::set_file_times(path, ft, ft)
    }

    fn set_creation(&self, _path: &Path, _at: DateTime<Utc>) -> io::Result<CreationTime> {
        Ok(CreationTime::Unsupported)
    }
}

/// Access, modification and creation times, via `SetFileTime`.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FullWriter;

#[cfg(windows)]
impl TimestampWriter for FullWriter {
    fn set_access_and_modification(&self, path: &Path, at: DateTime<Utc>) -> io::Result<()> {
        PartialWriter.set_access_and_modification(path, at)
    }

    fn set_creation(&self, path: &Path, at: DateTime<Utc>) -> io::Result<CreationTime> {
        let time = NativeFileTime::from_datetime(at).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside the FILETIME range", at.to_rfc3339()),
            )
        })?;
        native::set_file_times(path, time)?;
        Ok(CreationTime::Updated)
    }

    fn supports_creation_time(&self) -> bool {
        true
    }
}

/// Pick the writer for this platform. `creation_time = false` forces the partial writer.
#[cfg(windows)]
pub fn platform_writer(creation_time: bool) -> Box<dyn TimestampWriter> {
    if creation_time {
        Box::new(FullWriter)
    } else {
        Box::new(PartialWriter)
    }
}

/// Pick the writer for this platform. Creation time is never settable here.
#[cfg(not(windows))]
pub fn platform_writer(_creation_time: bool) -> Box<dyn TimestampWriter> {
    Box::new(PartialWriter)
}

#[cfg(windows)]
mod native {
    use std::fs::OpenOptions;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;

    use windows_sys::Win32::Foundation::{FILETIME, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::SetFileTime;

    use super::NativeFileTime;

    /// Creation, last-access and last-write all set to `time`. Needs read-write access.
    pub(super) fn set_file_times(path: &Path, time: NativeFileTime) -> io::Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let ft = FILETIME {
            dwLowDateTime: time.low,
            dwHighDateTime: time.high,
        };
        // SAFETY: the handle is owned by `file`, which outlives the call.
        let ok = unsafe { SetFileTime(file.as_raw_handle() as HANDLE, &ft, &ft, &ft) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
