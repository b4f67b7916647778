// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that removes orphaned workspaces.
//!
//! Every rollout removes its own workspace and archive. A process that dies
//! mid-rollout leaves them behind:
//! - `{DATA_DIR}/workspaces/{job_key}/` - extracted artifact and descriptor
//! - `{DATA_DIR}/uploads/*` - archives that were never consumed
//!
//! This worker periodically removes entries older than the configured age and
//! forgets finished jobs of the same age. Archives of tracked jobs that have
//! not finished yet are never removed, however long they wait for a worker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::jobs::JobTracker;

/// Configuration for the workspace sweeper.
#[derive(Debug, Clone)]
pub struct WorkspaceSweeperConfig {
    /// Directory holding build workspaces.
    pub workspaces_dir: PathBuf,
    /// Directory holding uploaded archives.
    pub uploads_dir: PathBuf,
    /// How often to scan.
    pub poll_interval: Duration,
    /// Age after which an entry is removed.
    pub max_age: Duration,
}

impl Default for WorkspaceSweeperConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: PathBuf::from(".data/workspaces"),
            uploads_dir: PathBuf::from(".data/uploads"),
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries removed
    pub removed: u64,
    /// Entries that could not be inspected or removed
    pub errors: u64,
    /// Finished jobs forgotten
    pub jobs_pruned: u64,
}

/// Background worker that removes old workspaces and uploads.
pub struct WorkspaceSweeper {
    config: WorkspaceSweeperConfig,
    tracker: Option<JobTracker>,
    shutdown: Arc<Notify>,
}

impl WorkspaceSweeper {
    /// Create a new sweeper.
    pub fn new(config: WorkspaceSweeperConfig) -> Self {
        Self {
            config,
            tracker: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Also prune finished jobs from `tracker`, and keep the archives of its
    /// unfinished ones.
    pub fn with_tracker(mut self, tracker: JobTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweeper loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            workspaces_dir = %self.config.workspaces_dir.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_hours = self.config.max_age.as_secs() / 3600,
            "Workspace sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Workspace sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep_once().await;
                }
            }
        }

        info!("Workspace sweeper stopped");
    }

    /// Run one sweep.
    pub async fn sweep_once(&self) -> SweepStats {
        let cutoff = match chrono::Duration::from_std(self.config.max_age) {
            Ok(age) => Utc::now() - age,
            Err(e) => {
                error!(error = %e, "Sweeper max age out of range");
                return SweepStats::default();
            }
        };

        let in_use = self
            .tracker
            .as_ref()
            .map(JobTracker::active_artifacts)
            .unwrap_or_default();
        let nothing = HashSet::new();

        let mut stats = SweepStats::default();
        for (dir, keep) in [
            (&self.config.workspaces_dir, &nothing),
            (&self.config.uploads_dir, &in_use),
        ] {
            let (removed, errors) = sweep_dir(dir, cutoff, keep).await;
            stats.removed += removed;
            stats.errors += errors;
        }
        if let Some(tracker) = &self.tracker {
            stats.jobs_pruned = tracker.prune(self.config.max_age) as u64;
        }

        if stats.removed > 0 || stats.errors > 0 {
            info!(
                removed = stats.removed,
                errors = stats.errors,
                jobs_pruned = stats.jobs_pruned,
                "Sweep completed"
            );
        } else {
            debug!("Sweep completed, nothing to remove");
        }

        stats
    }
}

/// Remove direct children of `dir` last modified before `cutoff`, except `keep`.
async fn sweep_dir(dir: &Path, cutoff: DateTime<Utc>, keep: &HashSet<PathBuf>) -> (u64, u64) {
    let mut removed = 0u64;
    let mut errors = 0u64;

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "Directory does not exist, nothing to sweep");
            return (0, 0);
        }
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to read directory");
            return (0, 1);
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if keep.contains(&path) {
            continue;
        }

        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to get modification time");
                errors += 1;
                continue;
            }
        };

        if modified > cutoff {
            continue;
        }

        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    age_hours = (Utc::now() - modified).num_hours(),
                    "Removed orphaned entry"
                );
                removed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned entry");
                errors += 1;
            }
        }
    }

    (removed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobId;
    use crate::orchestrator::RolloutJob;
    use tempfile::TempDir;

    fn config(root: &Path, max_age: Duration) -> WorkspaceSweeperConfig {
        WorkspaceSweeperConfig {
            workspaces_dir: root.join("workspaces"),
            uploads_dir: root.join("uploads"),
            poll_interval: Duration::from_millis(10),
            max_age,
        }
    }

    #[test]
    fn test_config_default() {
        let config = WorkspaceSweeperConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3600));
        assert_eq!(config.max_age, Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_sweep_missing_directories() {
        let temp = TempDir::new().unwrap();
        let sweeper = WorkspaceSweeper::new(config(&temp.path().join("nope"), Duration::ZERO));
        assert_eq!(sweeper.sweep_once().await, SweepStats::default());
    }

    #[tokio::test]
    async fn test_sweep_removes_old_entries() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("workspaces/ns-dep-0001");
        std::fs::create_dir_all(ws.join("server")).unwrap();
        std::fs::write(ws.join("server/index.mjs"), "x").unwrap();
        std::fs::create_dir_all(temp.path().join("uploads")).unwrap();
        std::fs::write(temp.path().join("uploads/stale.zip"), "x").unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sweeper = WorkspaceSweeper::new(config(temp.path(), Duration::ZERO));
        let stats = sweeper.sweep_once().await;

        assert_eq!(stats.removed, 2);
        assert!(!ws.exists());
        assert!(!temp.path().join("uploads/stale.zip").exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_archives_of_waiting_jobs() {
        let temp = TempDir::new().unwrap();
        let uploads = temp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("queued.zip"), "x").unwrap();
        std::fs::write(uploads.join("stale.zip"), "x").unwrap();

        let tracker = JobTracker::new();
        tracker.register(&RolloutJob {
            id: JobId::new(),
            namespace_id: "ns".to_string(),
            deployment_id: "dep".to_string(),
            artifact_path: uploads.join("queued.zip"),
            entrypoint: String::new(),
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sweeper =
            WorkspaceSweeper::new(config(temp.path(), Duration::ZERO)).with_tracker(tracker);
        let stats = sweeper.sweep_once().await;

        assert_eq!(stats.removed, 1);
        assert!(uploads.join("queued.zip").exists());
        assert!(!uploads.join("stale.zip").exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_entries() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("workspaces/ns-dep-0002");
        std::fs::create_dir_all(&ws).unwrap();

        let sweeper = WorkspaceSweeper::new(config(temp.path(), Duration::from_secs(3600)));
        let stats = sweeper.sweep_once().await;

        assert_eq!(stats.removed, 0);
        assert!(ws.exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp = TempDir::new().unwrap();
        let sweeper = Arc::new(WorkspaceSweeper::new(config(temp.path(), Duration::ZERO)));
        let shutdown = sweeper.shutdown_handle();

        let handle = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.notify_one();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
