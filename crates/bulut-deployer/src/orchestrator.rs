// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rollout orchestration.
//!
//! One rollout turns an uploaded artifact into the running container of a
//! deployment:
//!
//! ```text
//! Received → WorkspacePrepared → DescriptorReady → ImageBuilt → RevisionRecorded
//!          → OldContainerRemoved → NewContainerRunning → DeploymentUpdated → CleanedUp
//! ```
//!
//! Steps run strictly in order and are attempted once. Any failure jumps to
//! cleanup and ends in `Failed`. Cleanup (workspace and archive removal) runs
//! on every path and its own failures are only logged.
//!
//! A failure before `OldContainerRemoved` leaves the previous container
//! serving and the deployment untouched. A failure between removing the old
//! container and saving the deployment can leave the deployment without a
//! running container; a container started before a failed save is left
//! running and is reaped by name on the next rollout.
//!
//! The whole sequence runs under the deployment's lock, so address
//! allocation and the container bind of two rollouts of one deployment never
//! interleave.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bulut_core::{Deployment, Persistence, Revision};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::address::{AddressAllocator, AddressRange, LoopbackAllocator};
use crate::config::{Config, DEFAULT_CONTAINER_PORT, DEFAULT_HOST_PORT};
use crate::descriptor::{DescriptorPolicy, DescriptorTemplate};
use crate::engine::{BuiltImage, ContainerController, ImageBuilder, RunRequest, RunningContainer};
use crate::error::{Error, Result};
use crate::jobs::{JobId, JobTracker};
use crate::locks::DeploymentLocks;
use crate::revision::RevisionRecorder;
use crate::workspace::{Workspace, WorkspaceManager};

/// Rollout state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    /// Job accepted and deployment locked
    Received,
    /// Artifact extracted into a fresh workspace
    WorkspacePrepared,
    /// Build descriptor in place
    DescriptorReady,
    /// Image built, tagged and inspected
    ImageBuilt,
    /// Revision persisted
    RevisionRecorded,
    /// Previous container gone
    OldContainerRemoved,
    /// New container started
    NewContainerRunning,
    /// Deployment points at the new container
    DeploymentUpdated,
    /// Workspace and archive removed after success
    CleanedUp,
    /// Aborted; workspace and archive removed
    Failed,
}

impl RolloutState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CleanedUp | Self::Failed)
    }

    /// Snake-case name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::WorkspacePrepared => "workspace_prepared",
            Self::DescriptorReady => "descriptor_ready",
            Self::ImageBuilt => "image_built",
            Self::RevisionRecorded => "revision_recorded",
            Self::OldContainerRemoved => "old_container_removed",
            Self::NewContainerRunning => "new_container_running",
            Self::DeploymentUpdated => "deployment_updated",
            Self::CleanedUp => "cleaned_up",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RolloutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build job for one deployment.
#[derive(Debug, Clone)]
pub struct RolloutJob {
    /// Job id, used for status tracking
    pub id: JobId,
    /// Namespace the deployment must belong to
    pub namespace_id: String,
    /// Deployment to roll out
    pub deployment_id: String,
    /// Uploaded archive; removed when the job ends
    pub artifact_path: PathBuf,
    /// Entrypoint relative to the artifact root; empty selects the default
    pub entrypoint: String,
}

/// What a successful rollout produced.
#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    /// Deployment after the pointer update
    pub deployment: Deployment,
    /// Recorded revision
    pub revision: Revision,
    /// Built image
    pub image: BuiltImage,
    /// Started container
    pub container: RunningContainer,
    /// Container the deployment pointed at before
    pub previous_container_id: Option<String>,
}

/// Tunables shared by every rollout.
#[derive(Debug, Clone)]
pub struct RolloutSettings {
    /// Port the application listens on inside the container
    pub container_port: u16,
    /// Port published on the allocated host address
    pub host_port: u16,
    /// Deadline for an image build
    pub build_timeout: Duration,
    /// Deadline for every other engine call
    pub engine_timeout: Duration,
    /// Whether an artifact's own descriptor is kept
    pub descriptor_policy: DescriptorPolicy,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            container_port: DEFAULT_CONTAINER_PORT,
            host_port: DEFAULT_HOST_PORT,
            build_timeout: Duration::from_secs(600),
            engine_timeout: Duration::from_secs(60),
            descriptor_policy: DescriptorPolicy::Overwrite,
        }
    }
}

impl From<&Config> for RolloutSettings {
    fn from(config: &Config) -> Self {
        Self {
            container_port: config.container_port,
            host_port: config.host_port,
            build_timeout: config.build_timeout,
            engine_timeout: config.engine_timeout,
            descriptor_policy: config.descriptor_policy,
        }
    }
}

/// Image repository and container name for a deployment.
pub fn deployment_resource_name(namespace_id: &str, deployment_id: &str) -> String {
    format!("bulut-{}-{}", namespace_id, deployment_id)
}

/// Builder for a [`RolloutOrchestrator`].
pub struct RolloutOrchestratorBuilder {
    persistence: Arc<dyn Persistence>,
    image_builder: Arc<dyn ImageBuilder>,
    controller: Arc<dyn ContainerController>,
    allocator: Option<Arc<dyn AddressAllocator>>,
    workspaces: WorkspaceManager,
    descriptor: DescriptorTemplate,
    settings: RolloutSettings,
    locks: DeploymentLocks,
    tracker: JobTracker,
}

impl RolloutOrchestratorBuilder {
    /// Address allocator. Defaults to a [`LoopbackAllocator`] over `127.0.0.100-255`.
    pub fn address_allocator(mut self, allocator: Arc<dyn AddressAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Workspace manager. Defaults to `.data/workspaces`.
    pub fn workspaces(mut self, workspaces: WorkspaceManager) -> Self {
        self.workspaces = workspaces;
        self
    }

    /// Descriptor template.
    pub fn descriptor(mut self, descriptor: DescriptorTemplate) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Rollout settings.
    pub fn settings(mut self, settings: RolloutSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a lock table with other orchestrators.
    pub fn locks(mut self, locks: DeploymentLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Report progress into `tracker`.
    pub fn tracker(mut self, tracker: JobTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> RolloutOrchestrator {
        RolloutOrchestrator {
            recorder: RevisionRecorder::new(self.persistence.clone()),
            persistence: self.persistence,
            image_builder: self.image_builder,
            controller: self.controller,
            allocator: match self.allocator {
                Some(allocator) => allocator,
                None => Arc::new(LoopbackAllocator::new(AddressRange::default())),
            },
            workspaces: self.workspaces,
            descriptor: self.descriptor,
            settings: self.settings,
            locks: self.locks,
            tracker: self.tracker,
        }
    }
}

/// Drives rollouts through the state machine.
pub struct RolloutOrchestrator {
    persistence: Arc<dyn Persistence>,
    image_builder: Arc<dyn ImageBuilder>,
    controller: Arc<dyn ContainerController>,
    allocator: Arc<dyn AddressAllocator>,
    recorder: RevisionRecorder,
    workspaces: WorkspaceManager,
    descriptor: DescriptorTemplate,
    settings: RolloutSettings,
    locks: DeploymentLocks,
    tracker: JobTracker,
}

/// Progress of one rollout, kept so cleanup and failure reporting know how far it got.
struct Progress<'a> {
    job: &'a RolloutJob,
    tracker: &'a JobTracker,
    reached: RolloutState,
    workspace: Option<Workspace>,
}

impl Progress<'_> {
    fn advance(&mut self, state: RolloutState) {
        debug!(
            job_id = %self.job.id,
            deployment_id = %self.job.deployment_id,
            state = %state,
            "Rollout state changed"
        );
        self.reached = state;
        self.tracker.advance(&self.job.id, state);
    }
}

impl RolloutOrchestrator {
    /// Start building an orchestrator around its three required collaborators.
    pub fn builder(
        persistence: Arc<dyn Persistence>,
        image_builder: Arc<dyn ImageBuilder>,
        controller: Arc<dyn ContainerController>,
    ) -> RolloutOrchestratorBuilder {
        RolloutOrchestratorBuilder {
            persistence,
            image_builder,
            controller,
            allocator: None,
            workspaces: WorkspaceManager::new(PathBuf::from(".data").join("workspaces")),
            descriptor: DescriptorTemplate::default(),
            settings: RolloutSettings::default(),
            locks: DeploymentLocks::new(),
            tracker: JobTracker::new(),
        }
    }

    /// The tracker this orchestrator reports into.
    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// The workspace manager.
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Check that the job's deployment exists in the job's namespace.
    pub async fn check_target(&self, job: &RolloutJob) -> Result<Deployment> {
        self.persistence
            .find_deployment_by_id(&job.deployment_id)
            .await?
            .filter(|d| d.namespace_id == job.namespace_id)
            .ok_or_else(|| {
                Error::DeploymentNotFound(format!(
                    "{} in namespace {}",
                    job.deployment_id, job.namespace_id
                ))
            })
    }

    /// Run one rollout to completion.
    ///
    /// Waits for the deployment's lock first. The workspace and the uploaded
    /// archive are removed before this returns, whatever the outcome.
    pub async fn execute(&self, job: &RolloutJob) -> Result<RolloutOutcome> {
        let started = Instant::now();
        let _guard = self.locks.acquire(&job.deployment_id).await;

        let mut progress = Progress {
            job,
            tracker: &self.tracker,
            reached: RolloutState::Received,
            workspace: None,
        };
        progress.advance(RolloutState::Received);

        let result = self.rollout(&mut progress).await;

        self.cleanup(job, progress.workspace.take()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                self.tracker.succeed(&job.id, outcome);
                info!(
                    job_id = %job.id,
                    namespace_id = %job.namespace_id,
                    deployment_id = %job.deployment_id,
                    revision_id = %outcome.revision.id,
                    container_id = %outcome.container.container_id,
                    address = %outcome.container.bound_address,
                    elapsed_ms,
                    "Rollout completed"
                );
            }
            Err(e) => {
                self.tracker.fail(&job.id, progress.reached, e);
                error!(
                    job_id = %job.id,
                    namespace_id = %job.namespace_id,
                    deployment_id = %job.deployment_id,
                    artifact = %job.artifact_path.display(),
                    failed_at = %progress.reached,
                    error_code = e.error_code(),
                    error = %e,
                    elapsed_ms,
                    "Rollout failed"
                );
            }
        }

        result
    }

    async fn rollout(&self, progress: &mut Progress<'_>) -> Result<RolloutOutcome> {
        let job = progress.job;
        let settings = &self.settings;

        let mut deployment = self.check_target(job).await?;

        let job_key = WorkspaceManager::job_key(&job.namespace_id, &job.deployment_id);
        let workspace = progress
            .workspace
            .insert(self.workspaces.create(&job_key, &job.artifact_path).await?);
        let files = self.workspaces.extract_artifact(workspace).await?;
        debug!(job_id = %job.id, files, "Artifact extracted");
        let notes = match workspace.archive_digest().await {
            Ok(digest) => Some(format!("artifact sha256:{}", digest)),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to digest artifact");
                None
            }
        };
        let context_dir = workspace.dir().to_path_buf();
        progress.advance(RolloutState::WorkspacePrepared);

        self.descriptor
            .ensure(&context_dir, &job.entrypoint, settings.descriptor_policy)
            .await?;
        progress.advance(RolloutState::DescriptorReady);

        let resource_name = deployment_resource_name(&job.namespace_id, &job.deployment_id);
        debug!(
            job_id = %job.id,
            engine = self.image_builder.engine_type(),
            image = %resource_name,
            "Building image"
        );
        let image = with_deadline(
            "image build",
            settings.build_timeout,
            self.image_builder.build(&context_dir, &resource_name),
        )
        .await?;
        progress.advance(RolloutState::ImageBuilt);

        let revision = self.recorder.record(&deployment.id, &image, notes).await?;
        progress.advance(RolloutState::RevisionRecorded);

        let previous_container_id = deployment.current_container().map(str::to_string);
        if let Some(previous) = &previous_container_id {
            with_deadline(
                "container remove",
                settings.engine_timeout,
                self.controller.stop_and_remove(previous),
            )
            .await?;
        }
        // Reap a container left running by a rollout whose final save failed.
        with_deadline(
            "container remove",
            settings.engine_timeout,
            self.controller.stop_and_remove(&resource_name),
        )
        .await?;
        self.allocator.release(&deployment.id);
        progress.advance(RolloutState::OldContainerRemoved);

        let address = self.allocator.allocate(&deployment.id, settings.host_port)?;
        let request = RunRequest {
            image_name: image.image_name.clone(),
            container_name: resource_name,
            address,
            container_port: settings.container_port,
            host_port: settings.host_port,
        };
        let container = match with_deadline(
            "container start",
            settings.engine_timeout,
            self.controller.run(&request),
        )
        .await
        {
            Ok(container) => container,
            Err(e) => {
                // A call cut short by its deadline may have created the
                // container without starting it.
                if let Err(cleanup) = with_deadline(
                    "container remove",
                    settings.engine_timeout,
                    self.controller.stop_and_remove(&request.container_name),
                )
                .await
                {
                    warn!(
                        job_id = %job.id,
                        container_name = %request.container_name,
                        error = %cleanup,
                        "Failed to remove container that did not start"
                    );
                }
                self.allocator.release(&deployment.id);
                return Err(e);
            }
        };
        progress.advance(RolloutState::NewContainerRunning);

        deployment.current_container_id = Some(container.container_id.clone());
        let deployment = self.persistence.save_deployment(&deployment).await?;
        progress.advance(RolloutState::DeploymentUpdated);

        Ok(RolloutOutcome {
            deployment,
            revision,
            image,
            container,
            previous_container_id,
        })
    }

    /// Remove the workspace, or only the archive if no workspace was created.
    async fn cleanup(&self, job: &RolloutJob, workspace: Option<Workspace>) {
        let result = match workspace {
            Some(workspace) => workspace.destroy().await,
            None => match tokio::fs::remove_file(&job.artifact_path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
                _ => Ok(()),
            },
        };

        if let Err(e) = result {
            warn!(
                job_id = %job.id,
                artifact = %job.artifact_path.display(),
                error = %e,
                "Rollout cleanup failed"
            );
        }
    }
}

/// Bound an engine call, mapping expiry to [`Error::DeadlineExceeded`].
async fn with_deadline<T>(
    operation: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::DeadlineExceeded {
            operation: operation.to_string(),
            timeout,
        })?
}
