//! The video upload pipeline.
//!
//! `Admitted → Authorized → Staged → Probed → Classified → Remuxed →
//! Uploaded → Committed`, stopping at the first failing step. Staged and
//! remuxed files are owned by guards local to one run, so they are removed
//! on every exit path.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    HeaderMap,
};
use futures::{StreamExt, TryStreamExt};
use multer::{Constraints, Multipart, SizeLimit};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aspect::AspectCategory;
use crate::auth::{self, TokenValidator};
use crate::config::{StorageConfig, UrlMode};
use crate::db::VideoStore;
use crate::error::{ApiError, ErrorKind};
use crate::ffmpeg::{fast_start_output_path, FastStartRemuxer, MediaError, MediaProber};
use crate::models::VideoRecord;
use crate::staging::{BodyStream, ScratchPath, StageError, Stager};
use crate::storage::{split_bucket_key, LocationScheme, ObjectStore, StorageKey};

/// The only container type accepted for upload.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Multipart field that carries the file.
pub const VIDEO_FIELD: &str = "video";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Admitted,
    Authorized,
    Staged,
    Probed,
    Classified,
    Remuxed,
    Uploaded,
    Committed,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::Admitted => "admission",
            Self::Authorized => "authorization",
            Self::Staged => "staging",
            Self::Probed => "probe",
            Self::Classified => "classification",
            Self::Remuxed => "remux",
            Self::Uploaded => "upload",
            Self::Committed => "commit",
        };
        f.write_str(step)
    }
}

/// One inbound upload, detached from the HTTP framework.
pub struct UploadRequest {
    /// Raw path parameter; parsed by the pipeline.
    pub video_id: String,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// External services the pipeline talks to.
pub struct Collaborators {
    pub videos: Arc<dyn VideoStore>,
    pub tokens: Arc<dyn TokenValidator>,
    pub prober: Arc<dyn MediaProber>,
    pub remuxer: Arc<dyn FastStartRemuxer>,
    pub objects: Arc<dyn ObjectStore>,
}

pub struct UploadPipeline {
    videos: Arc<dyn VideoStore>,
    tokens: Arc<dyn TokenValidator>,
    prober: Arc<dyn MediaProber>,
    remuxer: Arc<dyn FastStartRemuxer>,
    objects: Arc<dyn ObjectStore>,
    stager: Stager,
    locations: LocationScheme,
    presign_expiry: Duration,
}

impl UploadPipeline {
    pub fn new(collaborators: Collaborators, stager: Stager, storage: &StorageConfig) -> Self {
        let Collaborators {
            videos,
            tokens,
            prober,
            remuxer,
            objects,
        } = collaborators;

        Self {
            videos,
            tokens,
            prober,
            remuxer,
            objects,
            stager,
            locations: LocationScheme::new(storage),
            presign_expiry: storage.presign_expiry,
        }
    }

    /// Run one upload end to end and return the committed record.
    pub async fn upload_video(&self, request: UploadRequest) -> Result<VideoRecord, ApiError> {
        let start = Instant::now();
        let span = info_span!("upload_video", video_id = %request.video_id);
        let result = self.run(request).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(video) => info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                video_url = video.video_url.as_deref().unwrap_or_default(),
                "[upload] ✅ committed"
            ),
            Err(ApiError::Infrastructure { step, source }) => error!(
                %step,
                error = %format!("{source:#}"),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "[upload] ❌ failed"
            ),
            Err(e) if e.kind() == ErrorKind::Unauthorized => warn!(error = %e, "[upload] rejected"),
            Err(e) => info!(error = %e, "[upload] rejected"),
        });

        result
    }

    async fn run(&self, request: UploadRequest) -> Result<VideoRecord, ApiError> {
        let UploadRequest {
            video_id,
            headers,
            body,
        } = request;

        // Admitted: nothing is read from the body until ownership is settled.
        let video_id = Uuid::parse_str(video_id.trim()).map_err(|_| ApiError::InvalidVideoId)?;
        if let Some(length) = declared_length(&headers) {
            if length > self.stager.max_bytes() {
                return Err(ApiError::TooLarge {
                    limit: self.stager.max_bytes(),
                });
            }
        }
        debug!(state = ?UploadState::Admitted, "[upload] admitted");

        let token = auth::bearer_token(&headers)?;
        let user_id = self.tokens.validate(token)?;

        let mut video = self
            .videos
            .get_video(video_id)
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Authorized, e))?
            .ok_or(ApiError::VideoNotFound)?;

        if !video.is_owned_by(user_id) {
            return Err(ApiError::NotOwner);
        }
        debug!(state = ?UploadState::Authorized, %user_id, "[upload] owner verified");

        let (declared_type, stream) =
            open_video_part(&headers, body, self.stager.max_bytes()).await?;
        let content_type = validate_content_type(declared_type.as_deref())?;

        let staged = self.stager.stage(stream).await.map_err(|e| match e {
            StageError::TooLarge { limit } => ApiError::TooLarge { limit },
            StageError::Read(ref io) if body_limit_exceeded(io) => ApiError::TooLarge {
                limit: self.stager.max_bytes(),
            },
            other => ApiError::infrastructure(UploadState::Staged, other),
        })?;
        info!(
            state = ?UploadState::Staged,
            bytes = staged.len(),
            path = %staged.path().display(),
            "[upload] 📦 staged"
        );

        let category = match self.prober.display_aspect_ratio(staged.path()).await {
            Ok(ratio) => {
                debug!(state = ?UploadState::Probed, %ratio, "[upload] probed");
                AspectCategory::classify(&ratio)
            }
            Err(e @ MediaError::Decode(_)) => {
                return Err(ApiError::infrastructure(UploadState::Probed, e));
            }
            Err(e) => {
                warn!(error = %e, "[upload] probe failed, classifying as other");
                AspectCategory::Other
            }
        };
        debug!(state = ?UploadState::Classified, %category, "[upload] classified");

        // Guard the expected output before running the remux so a partial
        // file from a failed run is removed too.
        let _remux_output = ScratchPath::new(fast_start_output_path(staged.path()));
        let remuxed_path = self
            .remuxer
            .fast_start(staged.path())
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Remuxed, e))?;
        let _remuxed = (remuxed_path != fast_start_output_path(staged.path()))
            .then(|| ScratchPath::new(&remuxed_path));
        debug!(state = ?UploadState::Remuxed, path = %remuxed_path.display(), "[upload] remuxed");

        let key = StorageKey::new(category, video_id);
        let mut remuxed = File::open(&remuxed_path)
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Uploaded, e))?;
        remuxed
            .rewind()
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Uploaded, e))?;
        self.objects
            .put_file(&key, &content_type, &remuxed_path, remuxed)
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Uploaded, e))?;
        info!(state = ?UploadState::Uploaded, %key, "[upload] ☁️ stored");

        video.video_url = Some(self.locations.locate(&key));
        self.videos
            .update_video(&video)
            .await
            .map_err(|e| ApiError::infrastructure(UploadState::Committed, e))?;

        Ok(video)
    }

    pub async fn get_video(&self, video_id: &str) -> Result<VideoRecord, ApiError> {
        let video_id = Uuid::parse_str(video_id.trim()).map_err(|_| ApiError::InvalidVideoId)?;
        self.videos
            .get_video(video_id)
            .await?
            .ok_or(ApiError::VideoNotFound)
    }

    /// Prepare a record for clients: in presigned mode a stored `bucket,key`
    /// location is replaced with a temporary URL.
    pub async fn present(&self, mut video: VideoRecord) -> Result<VideoRecord, ApiError> {
        if self.locations.mode() != UrlMode::Presigned {
            return Ok(video);
        }

        let Some((bucket, key)) = video.video_url.as_deref().and_then(split_bucket_key) else {
            return Ok(video);
        };

        let url = self
            .objects
            .presign_get(bucket, key, self.presign_expiry)
            .await
            .map_err(ApiError::Presign)?;
        video.video_url = Some(url);
        Ok(video)
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Locate the file bytes and their declared type.
///
/// A `multipart/form-data` body yields its `video` part; anything else is
/// treated as the raw file with the request's own Content-Type. For
/// multipart, `max_bytes` caps the whole body, skipped fields included.
async fn open_video_part(
    headers: &HeaderMap,
    body: BodyStream,
    max_bytes: u64,
) -> Result<(Option<String>, BodyStream), ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let boundary = match content_type.as_deref().map(multer::parse_boundary) {
        Some(Ok(boundary)) => boundary,
        _ => return Ok((content_type, body)),
    };

    let constraints =
        Constraints::new().size_limit(SizeLimit::new().whole_stream(max_bytes));
    let mut multipart = Multipart::with_constraints(body, boundary, constraints);
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() == Some(VIDEO_FIELD) {
            let part_type = field
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let stream = field.map_err(io::Error::other).boxed();
            return Ok((part_type, stream));
        }

        // Drain the field
        while field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
            .is_some()
        {}
    }

    Err(ApiError::MissingFile)
}

fn multipart_error(e: multer::Error, max_bytes: u64) -> ApiError {
    match e {
        multer::Error::StreamSizeExceeded { .. } => ApiError::TooLarge { limit: max_bytes },
        other => ApiError::Multipart(other.to_string()),
    }
}

/// True when a body read failed because multer hit the whole-stream cap.
fn body_limit_exceeded(e: &io::Error) -> bool {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<multer::Error>())
        .is_some_and(|inner| matches!(inner, multer::Error::StreamSizeExceeded { .. }))
}

/// Accept exactly `video/mp4`, ignoring parameters and case.
fn validate_content_type(declared: Option<&str>) -> Result<String, ApiError> {
    let media_type = declared
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .filter(|mt| !mt.is_empty())
        .ok_or(ApiError::MissingContentType)?;

    if media_type != VIDEO_CONTENT_TYPE {
        return Err(ApiError::UnsupportedMediaType(media_type));
    }

    Ok(media_type)
}
