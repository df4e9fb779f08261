use std::io;
use std::path::PathBuf;

/// Failure to turn one sidecar's bytes into a [`crate::sidecar::SidecarRecord`].
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("sidecar is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("field `{field}` is unusable: {reason}")]
    Field { field: &'static str, reason: String },
}

impl SidecarError {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }
}

/// A failure scoped to a single directory or sidecar. Never aborts sibling work.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("cannot read directory {}: {source}", .path.display())]
    UnreadableDirectory { path: PathBuf, source: io::Error },

    #[error("cannot read sidecar {}: {source}", .sidecar.display())]
    UnreadableSidecar { sidecar: PathBuf, source: io::Error },

    #[error("cannot parse sidecar {}: {source}", .sidecar.display())]
    Decode {
        sidecar: PathBuf,
        source: serde_json::Error,
    },

    #[error("sidecar {} has unusable field `{field}`: {reason}", .sidecar.display())]
    Field {
        sidecar: PathBuf,
        field: &'static str,
        reason: String,
    },

    #[error("media file {} does not exist for sidecar {}", .media.display(), .sidecar.display())]
    MissingAsset { sidecar: PathBuf, media: PathBuf },

    #[error("cannot update times of {}: {source}", .media.display())]
    TimestampUpdate {
        sidecar: PathBuf,
        media: PathBuf,
        source: io::Error,
    },

    /// Modification and access times were already applied when this happened.
    #[error("cannot update creation time of {}: {source}", .media.display())]
    CreationTimeUpdate {
        sidecar: PathBuf,
        media: PathBuf,
        source: io::Error,
    },
}

/// Field-less mirror of [`SyncError`] for counting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    UnreadableDirectory,
    UnreadableSidecar,
    Decode,
    Field,
    MissingAsset,
    TimestampUpdate,
    CreationTimeUpdate,
}

impl SyncError {
    pub(crate) fn from_sidecar(sidecar: PathBuf, err: SidecarError) -> Self {
        match err {
            SidecarError::Decode(source) => Self::Decode { sidecar, source },
            SidecarError::Field { field, reason } => Self::Field {
                sidecar,
                field,
                reason,
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnreadableDirectory { .. } => FailureKind::UnreadableDirectory,
            Self::UnreadableSidecar { .. } => FailureKind::UnreadableSidecar,
            Self::Decode { .. } => FailureKind::Decode,
            Self::Field { .. } => FailureKind::Field,
            Self::MissingAsset { .. } => FailureKind::MissingAsset,
            Self::TimestampUpdate { .. } => FailureKind::TimestampUpdate,
            Self::CreationTimeUpdate { .. } => FailureKind::CreationTimeUpdate,
        }
    }

    /// The directory or sidecar file this failure concerns.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::UnreadableDirectory { path, .. } => path,
            Self::UnreadableSidecar { sidecar, .. }
            | Self::Decode { sidecar, .. }
            | Self::Field { sidecar, .. }
            | Self::MissingAsset { sidecar, .. }
            | Self::TimestampUpdate { sidecar, .. }
            | Self::CreationTimeUpdate { sidecar, .. } => sidecar,
        }
    }

    /// True when the media file's modification and access times were still applied.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::CreationTimeUpdate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_error_maps_to_sync_error() {
        let err = SidecarError::field("photoTakenTime.timestamp", "missing");
        let sync = SyncError::from_sidecar(PathBuf::from("a/b.jpg.json"), err);
        assert_eq!(sync.kind(), FailureKind::Field);
        assert_eq!(sync.path(), std::path::Path::new("a/b.jpg.json"));
        assert!(!sync.is_partial());
        assert!(sync.to_string().contains("photoTakenTime.timestamp"));
    }

    #[test]
    fn test_decode_error_kind() {
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        let sync = SyncError::from_sidecar(PathBuf::from("x.json"), SidecarError::from(json_err));
        assert_eq!(sync.kind(), FailureKind::Decode);
    }
}
