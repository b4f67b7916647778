// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime wiring.
//!
//! [`DeployerRuntime`] owns everything a long-lived deployer process needs:
//! the rollout orchestrator, the build queue in front of it, and the
//! workspace sweeper.
//!
//! # Example
//!
//! ```ignore
//! use bulut_deployer::{Config, DeployerRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let persistence = bulut_core::persistence::connect(&config.database_url).await?;
//!
//!     let runtime = DeployerRuntime::builder()
//!         .config(config)
//!         .persistence(persistence)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let job_id = runtime
//!         .queue()
//!         .submit_build(&namespace_id, &deployment_id, "/tmp/upload.zip", "")
//!         .await?;
//!     runtime.tracker().wait(&job_id).await;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bulut_core::Persistence;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::address::{AddressAllocator, LoopbackAllocator};
use crate::config::Config;
use crate::descriptor::DescriptorTemplate;
use crate::engine::{ContainerController, DockerCli, ImageBuilder};
use crate::jobs::JobTracker;
use crate::orchestrator::{RolloutOrchestrator, RolloutSettings};
use crate::queue::BuildQueue;
use crate::sweeper::{WorkspaceSweeper, WorkspaceSweeperConfig};
use crate::workspace::WorkspaceManager;

/// Builder for creating a [`DeployerRuntime`].
#[derive(Default)]
pub struct DeployerRuntimeBuilder {
    config: Option<Config>,
    persistence: Option<Arc<dyn Persistence>>,
    image_builder: Option<Arc<dyn ImageBuilder>>,
    controller: Option<Arc<dyn ContainerController>>,
    allocator: Option<Arc<dyn AddressAllocator>>,
    sweep_interval: Option<Duration>,
}

impl DeployerRuntimeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployer configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Persistence backend (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Image builder. Defaults to the docker CLI named in the config.
    pub fn image_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.image_builder = Some(builder);
        self
    }

    /// Container controller. Defaults to the docker CLI named in the config.
    pub fn container_controller(mut self, controller: Arc<dyn ContainerController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Address allocator. Defaults to a loopback allocator over the configured range.
    pub fn address_allocator(mut self, allocator: Arc<dyn AddressAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// How often the workspace sweeper scans. Defaults to one hour.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<DeployerRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;

        let (image_builder, controller) = match (self.image_builder, self.controller) {
            (Some(b), Some(c)) => (b, c),
            (b, c) => {
                let docker = Arc::new(DockerCli::new(&config.docker_bin)?);
                let default_builder: Arc<dyn ImageBuilder> = docker.clone();
                let default_controller: Arc<dyn ContainerController> = docker;
                (
                    b.unwrap_or(default_builder),
                    c.unwrap_or(default_controller),
                )
            }
        };

        let allocator: Arc<dyn AddressAllocator> = match self.allocator {
            Some(allocator) => allocator,
            None => Arc::new(LoopbackAllocator::new(config.address_range)),
        };

        Ok(DeployerRuntimeConfig {
            sweep_interval: self.sweep_interval.unwrap_or(Duration::from_secs(3600)),
            config,
            persistence,
            image_builder,
            controller,
            allocator,
        })
    }
}

/// Configuration for a [`DeployerRuntime`].
pub struct DeployerRuntimeConfig {
    config: Config,
    persistence: Arc<dyn Persistence>,
    image_builder: Arc<dyn ImageBuilder>,
    controller: Arc<dyn ContainerController>,
    allocator: Arc<dyn AddressAllocator>,
    sweep_interval: Duration,
}

impl DeployerRuntimeConfig {
    /// Create the data directories and start the background workers.
    pub async fn start(self) -> Result<DeployerRuntime> {
        let config = self.config;
        let workspaces_dir = config.workspaces_dir();
        let uploads_dir = config.uploads_dir();
        tokio::fs::create_dir_all(&workspaces_dir).await?;
        tokio::fs::create_dir_all(&uploads_dir).await?;

        let tracker = JobTracker::new();
        let orchestrator = RolloutOrchestrator::builder(
            self.persistence.clone(),
            self.image_builder,
            self.controller,
        )
        .address_allocator(self.allocator)
        .workspaces(WorkspaceManager::new(&workspaces_dir))
        .descriptor(DescriptorTemplate {
            base_image: config.base_image.clone(),
            container_port: config.container_port,
            default_entrypoint: config.default_entrypoint.clone(),
        })
        .settings(RolloutSettings::from(&config))
        .tracker(tracker.clone())
        .build();

        let queue = Arc::new(BuildQueue::new(
            Arc::new(orchestrator),
            config.max_concurrent_builds,
        ));

        let sweeper = WorkspaceSweeper::new(WorkspaceSweeperConfig {
            workspaces_dir: workspaces_dir.clone(),
            uploads_dir: uploads_dir.clone(),
            poll_interval: self.sweep_interval,
            max_age: config.workspace_max_age,
        })
        .with_tracker(tracker.clone());
        let sweeper_shutdown = sweeper.shutdown_handle();
        let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

        info!(
            data_dir = %config.data_dir.display(),
            max_concurrent_builds = config.max_concurrent_builds,
            "DeployerRuntime started"
        );

        Ok(DeployerRuntime {
            queue,
            tracker,
            persistence: self.persistence,
            uploads_dir,
            sweeper_shutdown,
            sweeper_handle,
        })
    }
}

/// A running deployer.
pub struct DeployerRuntime {
    queue: Arc<BuildQueue>,
    tracker: JobTracker,
    persistence: Arc<dyn Persistence>,
    uploads_dir: PathBuf,
    sweeper_shutdown: Arc<Notify>,
    sweeper_handle: JoinHandle<()>,
}

impl DeployerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> DeployerRuntimeBuilder {
        DeployerRuntimeBuilder::new()
    }

    /// The build queue.
    pub fn queue(&self) -> &Arc<BuildQueue> {
        &self.queue
    }

    /// Job status tracker.
    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Persistence backend.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Where uploaded archives should be placed before submission.
    pub fn uploads_dir(&self) -> &PathBuf {
        &self.uploads_dir
    }

    /// Check if the background workers are still running.
    pub fn is_running(&self) -> bool {
        !self.sweeper_handle.is_finished()
    }

    /// Wait for in-flight jobs, then stop the sweeper.
    pub async fn shutdown(self) -> Result<()> {
        info!("DeployerRuntime shutting down...");

        self.queue.drain().await;
        self.sweeper_shutdown.notify_one();

        if let Err(e) = self.sweeper_handle.await {
            error!("Workspace sweeper task panicked: {}", e);
            return Err(anyhow::anyhow!("sweeper task panicked: {}", e));
        }

        info!("DeployerRuntime shutdown complete");
        Ok(())
    }
}
