use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::fs;
use tracing::{info, warn};

use super::{archive_bucket, archive_sources, ArchiveError, Archiver};
use crate::config::S3Settings;
use crate::models::{JobRecord, JobStatus};

/// Constructs an S3 client for MinIO (custom endpoint) or AWS.
pub async fn build_s3_client(settings: &S3Settings) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"));

    if let (Some(key), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "ats-engine-static"));
    }
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let s3_config = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&s3_config);
    if settings.endpoint.is_some() {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}

/// Uploads artifacts under `success/<job>/` or `failure/<job>/`, then removes the local copies.
pub struct S3Archiver {
    client: Client,
    bucket: String,
}

impl S3Archiver {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    async fn upload(&self, key: &str, path: &Path) -> Result<(), ArchiveError> {
        let body = fs::read(path).await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ArchiveError::ObjectStore(format!("upload of {key} failed: {e}")))?;
        Ok(())
    }
}

/// Every file under `source` with its path relative to `source`'s parent.
async fn collect_files(source: &Path) -> Result<Vec<(PathBuf, String)>, ArchiveError> {
    let base = source.parent().unwrap_or(Path::new(""));
    let mut files = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(path) = pending.pop() {
        if fs::metadata(&path).await?.is_dir() {
            let mut entries = fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push(entry.path());
            }
        } else {
            let relative = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            files.push((path, relative));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[async_trait]
impl Archiver for S3Archiver {
    async fn archive(&self, job: &JobRecord, status: JobStatus) -> Result<Option<String>, ArchiveError> {
        let sources = archive_sources(job).await;
        if sources.is_empty() {
            return Ok(None);
        }

        let prefix = format!("{}/{}", archive_bucket(status), job.primary_identifier);
        let mut uploaded = 0;
        for source in &sources {
            for (path, relative) in collect_files(source).await? {
                self.upload(&format!("{prefix}/{relative}"), &path).await?;
                uploaded += 1;
            }
        }
        info!(
            "[{}] Uploaded {uploaded} file(s) to s3://{}/{prefix}",
            job.primary_identifier, self.bucket
        );

        for source in &sources {
            let removed = if fs::metadata(source).await?.is_dir() {
                fs::remove_dir_all(source).await
            } else {
                fs::remove_file(source).await
            };
            if let Err(e) = removed {
                warn!("[{}] Could not remove {} after upload: {e}", job.primary_identifier, source.display());
            }
        }

        Ok(Some(format!("s3://{}/{prefix}", self.bucket)))
    }
}
