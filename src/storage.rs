//! Object storage: key derivation, location addressing and the S3 uploader.
//!
//! Supports any S3-compatible backend (AWS S3, MinIO, R2) through a custom
//! endpoint.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::Region;
use aws_smithy_async::rt::sleep::TokioSleep;
use aws_sdk_s3::{
    config::{Credentials, IdentityCache, SharedCredentialsProvider, StalledStreamProtectionConfig},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aspect::AspectCategory;
use crate::config::{StorageConfig, UrlMode};

/// Object key of the form `{category}/{video_id}.mp4`.
///
/// Derived without randomness, so re-uploading a video overwrites its own
/// object instead of orphaning the previous one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(category: AspectCategory, video_id: Uuid) -> Self {
        Self(format!("{category}/{video_id}.mp4"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload handle is at offset {0}, expected 0")]
    NotRewound(u64),

    #[error("failed to read upload source: {0}")]
    Source(#[from] std::io::Error),

    #[error("failed to upload object: {0}")]
    Upload(String),

    #[error("failed to generate presigned URL: {0}")]
    Presign(String),
}

/// Remote object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the contents of `path` under `key`, replacing any existing
    /// object. `file` is an open handle on `path` and must be positioned at
    /// offset zero.
    async fn put_file(
        &self,
        key: &StorageKey,
        content_type: &str,
        path: &Path,
        file: File,
    ) -> Result<(), StorageError>;

    /// Temporary GET URL for `bucket`/`key`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

/// Turns a key into the value committed to a video record.
#[derive(Clone, Debug)]
pub struct LocationScheme {
    mode: UrlMode,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl LocationScheme {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            mode: config.url_mode,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn mode(&self) -> UrlMode {
        self.mode
    }

    pub fn locate(&self, key: &StorageKey) -> String {
        match self.mode {
            UrlMode::Public => match &self.endpoint {
                Some(endpoint) => format!(
                    "{}/{}/{}",
                    endpoint.trim_end_matches('/'),
                    self.bucket,
                    key
                ),
                None => format!(
                    "https://{}.s3.{}.amazonaws.com/{}",
                    self.bucket, self.region, key
                ),
            },
            UrlMode::Presigned => format!("{},{}", self.bucket, key),
        }
    }
}

/// Split a stored `bucket,key` location. Anything else is not a pair.
pub fn split_bucket_key(location: &str) -> Option<(&str, &str)> {
    let (bucket, key) = location.split_once(',')?;
    if bucket.is_empty() || key.is_empty() || key.contains(',') {
        return None;
    }
    Some((bucket, key))
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from configuration. Credentials come from
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` when set.
    pub fn new(config: &StorageConfig) -> Self {
        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region.clone()))
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .identity_cache(IdentityCache::no_cache())
            .sleep_impl(TokioSleep::new())
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts));

        if let (Ok(access_key), Ok(secret_key)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
            let credentials =
                Credentials::new(access_key, secret_key, session_token, None, "environment");
            builder = builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 client initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

/// Request body that reopens `path` for every send attempt, so the SDK
/// retry policy can replay it.
async fn file_body(path: &Path) -> Result<ByteStream, StorageError> {
    ByteStream::read_from()
        .path(path)
        .build()
        .await
        .map_err(|e| StorageError::Upload(e.to_string()))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(
        &self,
        key: &StorageKey,
        content_type: &str,
        path: &Path,
        mut file: File,
    ) -> Result<(), StorageError> {
        let position = file.stream_position().await?;
        if position != 0 {
            return Err(StorageError::NotRewound(position));
        }

        let length = file.metadata().await?.len();
        drop(file);
        let body = file_body(path).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(body)
            .content_length(length as i64)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        debug!(bucket = %self.bucket, %key, bytes = length, "object stored");
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}
