// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build job submission.
//!
//! [`BuildQueue::submit_build`] validates a job, registers it with the
//! [`JobTracker`] and returns its id straight away. The rollout runs on a
//! spawned task once one of `max_concurrent_builds` permits is free.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::jobs::{JobId, JobTracker};
use crate::orchestrator::{RolloutJob, RolloutOrchestrator};

/// Accepts build jobs and runs them on a bounded worker pool.
pub struct BuildQueue {
    orchestrator: Arc<RolloutOrchestrator>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl BuildQueue {
    /// Create a queue running at most `max_concurrent_builds` rollouts at once.
    pub fn new(orchestrator: Arc<RolloutOrchestrator>, max_concurrent_builds: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent_builds.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// The tracker jobs report into.
    pub fn tracker(&self) -> &JobTracker {
        self.orchestrator.tracker()
    }

    /// Accept a build job.
    ///
    /// Fails synchronously if the ids are empty, the artifact is not a file,
    /// or the deployment does not exist in the namespace. On failure the
    /// artifact is left in place; once accepted, the job owns it and removes
    /// it when it ends.
    pub async fn submit_build(
        &self,
        namespace_id: &str,
        deployment_id: &str,
        artifact_path: impl Into<PathBuf>,
        entrypoint: &str,
    ) -> Result<JobId> {
        let artifact_path = artifact_path.into();

        if namespace_id.trim().is_empty() {
            return Err(Error::InvalidJob("namespace id is empty".to_string()));
        }
        if deployment_id.trim().is_empty() {
            return Err(Error::InvalidJob("deployment id is empty".to_string()));
        }
        match tokio::fs::metadata(&artifact_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(Error::InvalidJob(format!(
                    "artifact {} is not a readable file",
                    artifact_path.display()
                )));
            }
        }

        let job = RolloutJob {
            id: JobId::new(),
            namespace_id: namespace_id.to_string(),
            deployment_id: deployment_id.to_string(),
            artifact_path,
            entrypoint: entrypoint.to_string(),
        };
        self.orchestrator.check_target(&job).await?;

        self.tracker().register(&job);
        info!(
            job_id = %job.id,
            namespace_id = %job.namespace_id,
            deployment_id = %job.deployment_id,
            artifact = %job.artifact_path.display(),
            "Build job accepted"
        );

        let job_id = job.id.clone();
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(job_id = %job.id, "Worker pool closed before the job started");
                return;
            };
            // The orchestrator logs and tracks the outcome.
            let _ = orchestrator.execute(&job).await;
        });

        Ok(job_id)
    }

    /// Number of submitted jobs that have not finished.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait for every submitted job to finish.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Build task panicked");
            }
        }
    }
}
