use super::{load_aws_config, read_closed_file, ClosedFile, Sink, UploadReceipt};
use crate::day_key::DayKey;
use crate::error::{ArchiveError, Result};
use crate::partition::build_sequenced_path;
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

const CONTENT_TYPE: &str = "application/x-ndjson";
const MAX_KEY_GENERATIONS: u32 = 1000;

/// Uploads each day file as one object, keyed by the configured key with the
/// day (and generation) inserted the same way local file names are built.
/// Objects are never overwritten: a taken key moves on to the next generation.
pub struct ObjectStoreSink {
    client: Client,
    bucket: String,
    key_template: String,
}

impl ObjectStoreSink {
    pub async fn connect(bucket: &str, key: &str, region: &str, endpoint: Option<&str>) -> Self {
        let sdk_config = load_aws_config(region).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        info!(bucket, region, "object store sink initialized");
        Self::new(Client::from_conf(builder.build()), bucket, key)
    }

    pub fn new(client: Client, bucket: impl Into<String>, key_template: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_template: key_template.into(),
        }
    }
}

pub fn object_key(key_template: &str, day: &DayKey, sequence: u32) -> String {
    build_sequenced_path(key_template.trim_start_matches('/'), day, sequence)
}

fn is_precondition_failed<E>(err: &SdkError<E>) -> bool {
    err.raw_response()
        .map(|response| response.status().as_u16() == 412)
        .unwrap_or(false)
}

#[async_trait]
impl Sink for ObjectStoreSink {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn upload(&self, file: &ClosedFile) -> Result<UploadReceipt> {
        let data = read_closed_file(file).await?;
        let bytes = data.len() as u64;

        for sequence in file.sequence..file.sequence.saturating_add(MAX_KEY_GENERATIONS) {
            let key = object_key(&self.key_template, &file.day, sequence);
            debug!(bytes, bucket=%self.bucket, key=%key, "uploading day file");
            let result = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(CONTENT_TYPE)
                .if_none_match("*")
                .body(ByteStream::from(data.clone()))
                .send()
                .await;
            match result {
                Ok(_) => {
                    info!(bytes, "uploaded s3://{}/{}", self.bucket, key);
                    return Ok(UploadReceipt { bytes });
                }
                Err(err) if is_precondition_failed(&err) => {
                    debug!(key=%key, "object key already taken");
                }
                Err(err) => {
                    return Err(ArchiveError::upload(&file.path, DisplayErrorContext(err)));
                }
            }
        }

        Err(ArchiveError::upload(
            &file.path,
            format!("no free object key after {MAX_KEY_GENERATIONS} generations"),
        ))
    }
}
