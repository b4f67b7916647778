// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory job status tracking.
//!
//! Rollouts run detached from whoever submitted them. The tracker keeps the
//! last known [`JobStatus`] of every job in a `watch` channel so callers can
//! poll it or wait for a terminal state.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::Error;
use crate::orchestrator::{RolloutJob, RolloutOutcome, RolloutState};

/// Identifier of a submitted rollout job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job id
    pub job_id: JobId,
    /// Namespace the job targets
    pub namespace_id: String,
    /// Deployment the job targets
    pub deployment_id: String,
    /// Uploaded archive the job consumes
    pub artifact_path: PathBuf,
    /// Current state
    pub state: RolloutState,
    /// Last state reached before the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<RolloutState>,
    /// Error message of a failed job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error code of a failed job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Revision recorded by the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    /// Image built by the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Container started by the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Host socket the new container is bound on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// When the job was accepted
    pub submitted_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    fn new(job: &RolloutJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id.clone(),
            namespace_id: job.namespace_id.clone(),
            deployment_id: job.deployment_id.clone(),
            artifact_path: job.artifact_path.clone(),
            state: RolloutState::Received,
            failed_at: None,
            error: None,
            error_code: None,
            revision_id: None,
            image_name: None,
            container_id: None,
            address: None,
            submitted_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Whether the job has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Job id to status table.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<DashMap<JobId, watch::Sender<JobStatus>>>,
}

impl JobTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a job in the `Received` state.
    pub fn register(&self, job: &RolloutJob) {
        let (tx, _rx) = watch::channel(JobStatus::new(job));
        self.jobs.insert(job.id.clone(), tx);
    }

    /// Record a state transition. Unknown jobs are ignored.
    pub fn advance(&self, job_id: &JobId, state: RolloutState) {
        self.modify(job_id, |status| status.state = state);
    }

    /// Mark a job as completed.
    pub fn succeed(&self, job_id: &JobId, outcome: &RolloutOutcome) {
        self.modify(job_id, |status| {
            status.state = RolloutState::CleanedUp;
            status.revision_id = Some(outcome.revision.id.clone());
            status.image_name = Some(outcome.image.image_name.clone());
            status.container_id = Some(outcome.container.container_id.clone());
            status.address = Some(outcome.container.bound_address.to_string());
            status.finished_at = Some(Utc::now());
        });
    }

    /// Mark a job as failed after reaching `failed_at`.
    pub fn fail(&self, job_id: &JobId, failed_at: RolloutState, error: &Error) {
        self.modify(job_id, |status| {
            status.state = RolloutState::Failed;
            status.failed_at = Some(failed_at);
            status.error = Some(error.to_string());
            status.error_code = Some(error.error_code().to_string());
            status.finished_at = Some(Utc::now());
        });
    }

    /// Current status of a job.
    pub fn get(&self, job_id: &JobId) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|tx| tx.borrow().clone())
    }

    /// Every tracked job, most recently submitted first.
    pub fn list(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.jobs.iter().map(|e| e.value().borrow().clone()).collect();
        all.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        all
    }

    /// Subscribe to a job's status changes.
    pub fn subscribe(&self, job_id: &JobId) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.get(job_id).map(|tx| tx.subscribe())
    }

    /// Archives still owned by unfinished jobs.
    pub fn active_artifacts(&self) -> HashSet<PathBuf> {
        self.jobs
            .iter()
            .filter_map(|e| {
                let status = e.value().borrow();
                (!status.is_finished()).then(|| status.artifact_path.clone())
            })
            .collect()
    }

    /// Wait until a job reaches a terminal state.
    ///
    /// Returns `None` if the job is unknown.
    pub async fn wait(&self, job_id: &JobId) -> Option<JobStatus> {
        let mut rx = self.subscribe(job_id)?;
        let status = rx.wait_for(JobStatus::is_finished).await.ok()?.clone();
        Some(status)
    }

    /// Forget finished jobs older than `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.jobs.len();
        self.jobs.retain(|_, tx| {
            let status = tx.borrow();
            status.finished_at.is_none_or(|finished| finished > cutoff)
        });
        before - self.jobs.len()
    }

    fn modify(&self, job_id: &JobId, f: impl FnOnce(&mut JobStatus)) {
        if let Some(tx) = self.jobs.get(job_id) {
            tx.send_modify(|status| {
                f(status);
                status.updated_at = Utc::now();
            });
        }
    }
}
