//! HTTP-facing error type for the upload API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::auth::AuthError;
use crate::db::StoreError;
use crate::models::ErrorResponse;
use crate::storage::StorageError;
use crate::upload::UploadState;

/// Coarse classification that decides status code and cleanup expectations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid video ID")]
    InvalidVideoId,

    #[error("Missing Content-Type for video")]
    MissingContentType,

    #[error("Invalid media type {0}, only video/mp4 uploads are accepted")]
    UnsupportedMediaType(String),

    #[error("Upload too large (max: {limit} bytes)")]
    TooLarge { limit: u64 },

    #[error("No video file provided")]
    MissingFile,

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("You are not the owner of this video")]
    NotOwner,

    #[error("Video not found")]
    VideoNotFound,

    #[error("{step} failed: {source:#}")]
    Infrastructure {
        step: UploadState,
        #[source]
        source: anyhow::Error,
    },

    #[error("Datastore error: {0}")]
    Datastore(#[from] StoreError),

    #[error("Failed to sign video URL: {0}")]
    Presign(#[source] StorageError),
}

impl ApiError {
    pub fn infrastructure(step: UploadState, source: impl Into<anyhow::Error>) -> Self {
        Self::Infrastructure {
            step,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVideoId
            | Self::MissingContentType
            | Self::UnsupportedMediaType(_)
            | Self::TooLarge { .. }
            | Self::MissingFile
            | Self::Multipart(_) => ErrorKind::BadRequest,
            Self::Auth(_) | Self::NotOwner => ErrorKind::Unauthorized,
            Self::VideoNotFound => ErrorKind::NotFound,
            Self::Infrastructure { .. } | Self::Datastore(_) | Self::Presign(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidVideoId => (StatusCode::BAD_REQUEST, "INVALID_VIDEO_ID"),
            Self::MissingContentType => (StatusCode::BAD_REQUEST, "MISSING_CONTENT_TYPE"),
            Self::UnsupportedMediaType(_) => (StatusCode::BAD_REQUEST, "INVALID_MIME_TYPE"),
            Self::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            Self::MissingFile => (StatusCode::BAD_REQUEST, "NO_FILE"),
            Self::Multipart(_) => (StatusCode::BAD_REQUEST, "INVALID_MULTIPART"),
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::NotOwner => (StatusCode::FORBIDDEN, "NOT_OWNER"),
            Self::VideoNotFound => (StatusCode::NOT_FOUND, "VIDEO_NOT_FOUND"),
            Self::Infrastructure { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::Datastore(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Presign(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::Infrastructure { step, .. } => format!("Internal error during {step}"),
            Self::Datastore(_) => "Database operation failed".to_string(),
            Self::Presign(_) => "Storage operation failed".to_string(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ApiError::InvalidVideoId.kind(), ErrorKind::BadRequest);
        assert_eq!(ApiError::TooLarge { limit: 1 }.kind(), ErrorKind::BadRequest);
        assert_eq!(
            ApiError::Auth(AuthError::MissingAuthHeader).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(ApiError::NotOwner.kind(), ErrorKind::Unauthorized);
        assert_eq!(ApiError::VideoNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(
            ApiError::infrastructure(UploadState::Remuxed, anyhow::anyhow!("boom")).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn infrastructure_maps_to_server_error() {
        let response =
            ApiError::infrastructure(UploadState::Uploaded, anyhow::anyhow!("secret key id"))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ownership_failure_is_forbidden() {
        assert_eq!(
            ApiError::NotOwner.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Auth(AuthError::InvalidToken).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
