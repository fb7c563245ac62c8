use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::VideoRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("video {0} does not exist")]
    Missing(Uuid),

    #[error("datastore error: {0}")]
    Backend(String),
}

/// Video record persistence.
///
/// Updates are last-writer-wins; no version checks are performed.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError>;

    /// Replace the stored record with `video` in a single write.
    async fn update_video(&self, video: &VideoRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryVideoStore {
    videos: RwLock<HashMap<Uuid, VideoRecord>>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_videos(videos: impl IntoIterator<Item = VideoRecord>) -> Self {
        let videos = videos.into_iter().map(|v| (v.id, v)).collect();
        Self {
            videos: RwLock::new(videos),
        }
    }

    /// Load a JSON array of video records.
    pub async fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let videos: Vec<VideoRecord> = serde_json::from_slice(&content)?;
        info!(count = videos.len(), path = %path.display(), "seeded video store");
        Ok(Self::with_videos(videos))
    }

    pub async fn insert(&self, video: VideoRecord) {
        self.videos.write().await.insert(video.id, video);
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.videos.read().await.get(&id).cloned())
    }

    async fn update_video(&self, video: &VideoRecord) -> Result<(), StoreError> {
        let mut videos = self.videos.write().await;
        let stored = videos.get_mut(&video.id).ok_or(StoreError::Missing(video.id))?;
        *stored = VideoRecord {
            updated_at: Utc::now(),
            ..video.clone()
        };
        Ok(())
    }
}
