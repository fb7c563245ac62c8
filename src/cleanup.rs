//! Periodic sweep of the staging directory.
//!
//! Requests remove their own files; this only catches leftovers from a
//! process that died mid-upload.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{error, info, warn};

use crate::config::CleanupConfig;
use crate::staging::STAGING_PREFIX;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes_freed: u64,
}

/// Delete staging files older than `max_age`. Files without the staging
/// prefix are never touched.
pub async fn sweep_staging_dir(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::default();
    if !fs::try_exists(dir).await? {
        return Ok(report);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_staged = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(STAGING_PREFIX));
        if !is_staged {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("[cleanup] Failed to get metadata for {:?}: {}", path, e);
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(e) => {
                warn!("[cleanup] Failed to get modification time for {:?}: {}", path, e);
                continue;
            }
        };

        // Files stamped in the future are left alone.
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };

        if age > max_age {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_freed += metadata.len();
                    info!(
                        "[cleanup] 🧹 Deleted stale staging file: {:?} (age: {:.1} min, size: {:.2} MB)",
                        path,
                        age.as_secs_f64() / 60.0,
                        metadata.len() as f64 / 1024.0 / 1024.0
                    );
                }
                Err(e) => {
                    error!("[cleanup] ❌ Failed to delete file {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(report)
}

/// Start a background task that periodically sweeps the staging directory.
pub fn start_cleanup_task(dir: PathBuf, config: CleanupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "[cleanup] 🧹 Starting periodic cleanup task (interval: {:.1} min, max age: {:.1} min)",
            config.interval.as_secs_f64() / 60.0,
            config.max_age.as_secs_f64() / 60.0
        );

        loop {
            interval.tick().await;

            match sweep_staging_dir(&dir, config.max_age, SystemTime::now()).await {
                Ok(report) if report.deleted > 0 => info!(
                    "[cleanup] ✅ Cleanup complete: {} files deleted, {:.2} MB freed",
                    report.deleted,
                    report.bytes_freed as f64 / 1024.0 / 1024.0
                ),
                Ok(_) => {}
                Err(e) => error!("[cleanup] Periodic cleanup error: {}", e),
            }
        }
    })
}
