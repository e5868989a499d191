mod object_store;
mod table_store;

pub use object_store::{object_key, ObjectStoreSink};
pub use table_store::{table_row, TableStoreSink};

use crate::config::SinkTarget;
use crate::day_key::DayKey;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A day file that no longer receives appends and is waiting for hand-off.
/// `sequence` counts earlier files of the same day closed by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedFile {
    pub path: PathBuf,
    pub day: DayKey,
    pub sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Size of the file content that was read and written to the destination.
    pub bytes: u64,
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads the whole file and writes it to the destination. Must be safe to
    /// repeat for the same file.
    async fn upload(&self, file: &ClosedFile) -> Result<UploadReceipt>;

    /// Only called after a successful `upload`.
    async fn delete_local(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| ArchiveError::file_system(path, err))
    }
}

pub enum ArchiveSink {
    ObjectStore(ObjectStoreSink),
    TableStore(TableStoreSink),
}

impl ArchiveSink {
    pub async fn from_target(target: &SinkTarget) -> Self {
        match target {
            SinkTarget::ObjectStore {
                bucket,
                key,
                region,
                endpoint,
            } => Self::ObjectStore(
                ObjectStoreSink::connect(bucket, key, region, endpoint.as_deref()).await,
            ),
            SinkTarget::TableStore {
                table,
                region,
                endpoint,
            } => Self::TableStore(TableStoreSink::connect(table, region, endpoint.as_deref()).await),
        }
    }
}

#[async_trait]
impl Sink for ArchiveSink {
    fn name(&self) -> &'static str {
        match self {
            Self::ObjectStore(sink) => sink.name(),
            Self::TableStore(sink) => sink.name(),
        }
    }

    async fn upload(&self, file: &ClosedFile) -> Result<UploadReceipt> {
        match self {
            Self::ObjectStore(sink) => sink.upload(file).await,
            Self::TableStore(sink) => sink.upload(file).await,
        }
    }
}

pub(crate) async fn read_closed_file(file: &ClosedFile) -> Result<Vec<u8>> {
    tokio::fs::read(&file.path)
        .await
        .map_err(|err| ArchiveError::file_system(&file.path, err))
}

pub(crate) async fn load_aws_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(region.to_string()))
        .load()
        .await
}
