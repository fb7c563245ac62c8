//! Scoped temporary files for inbound uploads.
//!
//! Every file created here is removed when its owning guard drops, so an
//! early return anywhere in the upload path releases the disk space.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// File name prefix for staged uploads; the sweeper only touches these.
pub const STAGING_PREFIX: &str = "tubely-upload-";

/// Inbound body bytes, already detached from the HTTP layer.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("failed to create staging file: {0}")]
    Create(#[source] io::Error),

    #[error("failed to write staging file: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read upload body: {0}")]
    Read(#[source] io::Error),
}

#[derive(Clone, Debug)]
pub struct Stager {
    dir: PathBuf,
    max_bytes: u64,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Copy `body` into a fresh temp file and rewind it to offset zero.
    ///
    /// The byte cap is checked before each chunk is written, so an oversized
    /// body never gets past the limit on disk and its file is removed.
    pub async fn stage<S>(&self, mut body: S) -> Result<StagedFile, StageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let dir = self.dir.clone();
        let (file, path) = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(dir)
        })
        .await
        .map_err(|e| StageError::Create(io::Error::other(e)))?
        .map_err(StageError::Create)?
        .into_parts();
        let mut file = File::from_std(file);

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StageError::Read)?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                debug!(path = %path.display(), limit = self.max_bytes, "upload over limit, discarding");
                return Err(StageError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await.map_err(StageError::Write)?;
        }

        file.flush().await.map_err(StageError::Write)?;
        file.rewind().await.map_err(StageError::Write)?;

        debug!(path = %path.display(), bytes = written, "upload staged");

        Ok(StagedFile {
            file,
            path,
            len: written,
        })
    }
}

/// A staged upload. Dropping it closes the handle and deletes the file.
#[derive(Debug)]
pub struct StagedFile {
    // Field order matters: the handle closes before the path is unlinked.
    #[cfg_attr(not(test), allow(dead_code))]
    file: File,
    path: TempPath,
    len: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

/// Removes a path produced by a later stage when dropped, whether or not the
/// stage actually got around to creating it.
#[derive(Debug)]
pub struct ScratchPath(PathBuf);

impl ScratchPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl Drop for ScratchPath {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove scratch file"),
        }
    }
}
