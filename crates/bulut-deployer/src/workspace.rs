// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-job build workspaces.
//!
//! Layout under the data directory:
//!
//! ```text
//! {DATA_DIR}/workspaces/{namespace_id}-{deployment_id}-{suffix}/
//!     Dockerfile
//!     ...extracted artifact...
//! ```
//!
//! A [`Workspace`] owns both its directory and the uploaded archive it was
//! created for. [`Workspace::destroy`] removes both; if a workspace is dropped
//! without being destroyed the same removal runs synchronously in `Drop`.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Creates and extracts job workspaces under a root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build a job key unique across concurrent builds.
    pub fn job_key(namespace_id: &str, deployment_id: &str) -> String {
        format!(
            "{}-{}-{:08x}",
            sanitize(namespace_id),
            sanitize(deployment_id),
            rand::random::<u32>()
        )
    }

    /// Create an empty workspace directory for `job_key`.
    ///
    /// Fails if the directory already exists, so two jobs can never share one.
    pub async fn create(&self, job_key: &str, archive: impl Into<PathBuf>) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root).await?;

        let dir = self.root.join(sanitize(job_key));
        tokio::fs::create_dir(&dir).await?;

        debug!(workspace = %dir.display(), "Workspace created");

        Ok(Workspace {
            dir,
            archive: archive.into(),
            destroyed: false,
        })
    }

    /// Extract the workspace's archive into its directory.
    ///
    /// Returns the number of regular files written. Every entry name is
    /// checked before anything is written; an entry that is absolute or
    /// contains a `..` component fails the whole extraction.
    pub async fn extract_artifact(&self, workspace: &Workspace) -> Result<usize> {
        let archive = workspace.archive.clone();
        let dir = workspace.dir.clone();

        tokio::task::spawn_blocking(move || extract_zip(&archive, &dir))
            .await
            .map_err(|e| Error::ExtractionFailed(format!("extraction task failed: {}", e)))?
    }
}

/// A job-scoped build directory plus the archive it was extracted from.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    archive: PathBuf,
    destroyed: bool,
}

impl Workspace {
    /// The workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 of the uploaded archive, lowercase hex.
    pub async fn archive_digest(&self) -> Result<String> {
        let archive = self.archive.clone();
        tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut file = File::open(&archive)?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
        .map_err(Error::from)
    }

    /// Remove the workspace directory and the uploaded archive.
    ///
    /// Both removals are attempted even if the first fails; a missing path
    /// counts as removed. Returns the first error encountered.
    pub async fn destroy(mut self) -> Result<()> {
        self.destroyed = true;

        let dir_result = ignore_missing(tokio::fs::remove_dir_all(&self.dir).await);
        let archive_result = ignore_missing(tokio::fs::remove_file(&self.archive).await);

        debug!(
            workspace = %self.dir.display(),
            archive = %self.archive.display(),
            "Workspace destroyed"
        );

        dir_result.and(archive_result).map_err(Error::from)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = ignore_missing(std::fs::remove_dir_all(&self.dir)) {
            warn!(workspace = %self.dir.display(), error = %e, "Failed to remove workspace on drop");
        }
        if let Err(e) = ignore_missing(std::fs::remove_file(&self.archive)) {
            warn!(archive = %self.archive.display(), error = %e, "Failed to remove archive on drop");
        }
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path).map_err(|e| {
        Error::ExtractionFailed(format!(
            "failed to open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::ExtractionFailed(format!("failed to read archive: {}", e)))?;

    // Validate every name before touching the filesystem.
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| Error::ExtractionFailed(format!("failed to read entry {}: {}", i, e)))?;
        let relative = safe_relative_path(entry.enclosed_name()).ok_or_else(|| {
            Error::ExtractionFailed(format!("entry '{}' escapes the workspace", entry.name()))
        })?;
        entries.push(relative);
    }

    let mut written = 0;
    for (i, relative) in entries.into_iter().enumerate() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::ExtractionFailed(format!("failed to read entry {}: {}", i, e)))?;
        let target = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            Error::ExtractionFailed(format!("failed to write '{}': {}", relative.display(), e))
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o777))?;
        }

        written += 1;
    }

    Ok(written)
}

fn safe_relative_path(enclosed: Option<PathBuf>) -> Option<PathBuf> {
    let path = enclosed?;
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then_some(path)
}
