use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::{StreamExt, TryStreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::error::ApiError;
use crate::models::{AppState, HealthResponse, VideoRecord};
use crate::upload::UploadRequest;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/videos/:video_id", get(get_video_handler))
        .route("/api/video_upload/:video_id", post(upload_video_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Upload a video file for an existing video record
pub async fn upload_video_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
    request: Request<Body>,
) -> Result<Json<VideoRecord>, ApiError> {
    let (parts, body) = request.into_parts();
    let body = body.into_data_stream().map_err(io::Error::other).boxed();

    let video = state
        .pipeline
        .upload_video(UploadRequest {
            video_id,
            headers: parts.headers,
            body,
        })
        .await?;

    // The upload is committed at this point; a signing failure must not turn
    // it into an error response.
    match state.pipeline.present(video.clone()).await {
        Ok(presented) => Ok(Json(presented)),
        Err(e) => {
            warn!(video_id = %video.id, error = %e, "[upload] committed but could not sign URL");
            Ok(Json(video))
        }
    }
}

pub async fn get_video_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoRecord>, ApiError> {
    let video = state.pipeline.get_video(&video_id).await?;
    Ok(Json(state.pipeline.present(video).await?))
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
