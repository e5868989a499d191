use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp { value: String },

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("file system error on {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {} failed: {message}", path.display())]
    Upload { path: PathBuf, message: String },

    #[error("rotation engine stopped")]
    EngineStopped,
}

impl ArchiveError {
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    pub fn upload(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Upload {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Records rejected for their content are dropped; everything else may be
    /// worth a redelivery by the transport.
    pub fn is_record_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimestamp { .. } | Self::InvalidRecord { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
