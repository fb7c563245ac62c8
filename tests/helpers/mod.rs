//! Shared fixtures for HTTP integration tests.
//!
//! The router is wired with the real JWT validator and in-memory video store.
//! Media tooling and object storage are replaced by in-process fakes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tower::ServiceExt;
use uuid::Uuid;

use tubely_backend::auth::{issue_access_token, JwtValidator};
use tubely_backend::config::{StorageConfig, UrlMode};
use tubely_backend::db::MemoryVideoStore;
use tubely_backend::ffmpeg::{fast_start_output_path, FastStartRemuxer, MediaError, MediaProber};
use tubely_backend::handlers;
use tubely_backend::models::{AppState, VideoRecord};
use tubely_backend::staging::Stager;
use tubely_backend::storage::{ObjectStore, StorageError, StorageKey};
use tubely_backend::upload::{Collaborators, UploadPipeline};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_BUCKET: &str = "tubely-it";
pub const TEST_REGION: &str = "us-east-2";
pub const BOUNDARY: &str = "----TubelyBoundary";

/// Reports a fixed ratio and remuxes by copying.
pub struct FakeMedia {
    pub ratio: &'static str,
}

#[async_trait]
impl MediaProber for FakeMedia {
    async fn display_aspect_ratio(&self, _path: &Path) -> Result<String, MediaError> {
        Ok(self.ratio.to_string())
    }
}

#[async_trait]
impl FastStartRemuxer for FakeMedia {
    async fn fast_start(&self, input: &Path) -> Result<PathBuf, MediaError> {
        let output = fast_start_output_path(input);
        tokio::fs::copy(input, &output)
            .await
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg",
                source,
            })?;
        Ok(output)
    }
}

/// Keeps every stored object in memory.
#[derive(Default)]
pub struct RecordingObjects {
    pub objects: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub presign_fails: AtomicBool,
}

#[async_trait]
impl ObjectStore for RecordingObjects {
    async fn put_file(
        &self,
        key: &StorageKey,
        content_type: &str,
        _path: &Path,
        mut file: File,
    ) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), bytes));
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        if self.presign_fails.load(Ordering::SeqCst) {
            return Err(StorageError::Presign("signing key unavailable".to_string()));
        }
        Ok(format!(
            "https://signed.test/{bucket}/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        ))
    }
}

pub struct TestApp {
    pub router: Router,
    pub videos: Arc<MemoryVideoStore>,
    pub objects: Arc<RecordingObjects>,
    pub staging: TempDir,
}

impl TestApp {
    pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    pub async fn oneshot(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Create a video owned by `user_id` and return its id.
    pub async fn create_video(&self, user_id: Uuid, title: &str) -> Uuid {
        let video = VideoRecord::new(Uuid::new_v4(), user_id, title);
        let id = video.id;
        self.videos.insert(video).await;
        id
    }

    pub fn stored_objects(&self) -> Vec<(String, String, Vec<u8>)> {
        self.objects.objects.lock().unwrap().clone()
    }

    pub fn fail_presigning(&self) {
        self.objects.presign_fails.store(true, Ordering::SeqCst);
    }

    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.staging.path()).unwrap().next().is_none()
    }
}

pub fn test_app(ratio: &'static str, url_mode: UrlMode) -> TestApp {
    let videos = Arc::new(MemoryVideoStore::new());
    let objects = Arc::new(RecordingObjects::default());
    let media = Arc::new(FakeMedia { ratio });
    let staging = tempfile::tempdir().unwrap();

    let storage = StorageConfig {
        bucket: TEST_BUCKET.to_string(),
        region: TEST_REGION.to_string(),
        endpoint: None,
        url_mode,
        presign_expiry: Duration::from_secs(600),
        max_attempts: 1,
    };

    let pipeline = UploadPipeline::new(
        Collaborators {
            videos: videos.clone(),
            tokens: Arc::new(JwtValidator::new(TEST_SECRET)),
            prober: media.clone(),
            remuxer: media,
            objects: objects.clone(),
        },
        Stager::new(staging.path(), 1 << 20),
        &storage,
    );

    let router = handlers::router(Arc::new(AppState {
        pipeline: Arc::new(pipeline),
    }));

    TestApp {
        router,
        videos,
        objects,
        staging,
    }
}

pub fn generate_access_token(user_id: Uuid) -> String {
    issue_access_token(user_id, TEST_SECRET, chrono::Duration::minutes(5)).unwrap()
}

/// Multipart body carrying one `video` part.
pub fn video_form(content_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"clip.mp4\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
