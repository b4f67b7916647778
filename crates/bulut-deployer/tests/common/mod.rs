// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for bulut-deployer integration tests.
//!
//! Provides a TestContext wired to in-memory SQLite and the mock engine.

#![allow(dead_code)]

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bulut_core::persistence::SqlitePersistence;
use bulut_core::{CoreError, Deployment, Namespace, NewRevision, Persistence, Revision};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use bulut_deployer::address::{AddressRange, LoopbackAllocator, PortProbe};
use bulut_deployer::engine::{MockContainerController, MockImageBuilder};
use bulut_deployer::orchestrator::{RolloutOrchestrator, RolloutSettings};
use bulut_deployer::workspace::WorkspaceManager;
use bulut_deployer::{JobId, RolloutJob};

/// Probe that reports every address as free; the mock engine enforces
/// address conflicts itself.
pub struct AlwaysFree;

impl PortProbe for AlwaysFree {
    fn is_free(&self, _addr: Ipv4Addr, _port: u16) -> bool {
        true
    }
}

/// SQLite store whose revision and deployment writes can be switched to fail.
pub struct FlakyPersistence {
    inner: SqlitePersistence,
    pub fail_create_revision: AtomicBool,
    pub fail_save_deployment: AtomicBool,
}

impl FlakyPersistence {
    fn outage(operation: &str) -> CoreError {
        CoreError::Database {
            operation: operation.to_string(),
            details: "connection reset by peer".to_string(),
        }
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn create_namespace(&self, name: &str) -> Result<Namespace, CoreError> {
        self.inner.create_namespace(name).await
    }

    async fn find_namespace_by_id(&self, id: &str) -> Result<Option<Namespace>, CoreError> {
        self.inner.find_namespace_by_id(id).await
    }

    async fn find_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>, CoreError> {
        self.inner.find_namespace_by_name(name).await
    }

    async fn create_deployment(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Deployment, CoreError> {
        self.inner.create_deployment(namespace_id, name).await
    }

    async fn find_deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, CoreError> {
        self.inner.find_deployment_by_id(id).await
    }

    async fn find_deployment_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Option<Deployment>, CoreError> {
        self.inner.find_deployment_by_name(namespace_id, name).await
    }

    async fn find_deployment_by_container_id(
        &self,
        namespace_id: &str,
        container_id: &str,
    ) -> Result<Option<Deployment>, CoreError> {
        self.inner
            .find_deployment_by_container_id(namespace_id, container_id)
            .await
    }

    async fn save_deployment(&self, deployment: &Deployment) -> Result<Deployment, CoreError> {
        if self.fail_save_deployment.load(Ordering::SeqCst) {
            return Err(Self::outage("save_deployment"));
        }
        self.inner.save_deployment(deployment).await
    }

    async fn create_revision(&self, revision: NewRevision) -> Result<Revision, CoreError> {
        if self.fail_create_revision.load(Ordering::SeqCst) {
            return Err(Self::outage("create_revision"));
        }
        self.inner.create_revision(revision).await
    }

    async fn list_revisions(&self, deployment_id: &str) -> Result<Vec<Revision>, CoreError> {
        self.inner.list_revisions(deployment_id).await
    }
}

/// Test context with a namespace `acme` and a deployment `api`.
pub struct TestContext {
    pub store: Arc<FlakyPersistence>,
    pub persistence: Arc<dyn Persistence>,
    pub builder: Arc<MockImageBuilder>,
    pub controller: Arc<MockContainerController>,
    pub allocator: Arc<LoopbackAllocator>,
    pub orchestrator: Arc<RolloutOrchestrator>,
    pub namespace: Namespace,
    pub deployment: Deployment,
    pub data_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Context with a succeeding engine.
    pub async fn new() -> Self {
        Self::with_engine(MockImageBuilder::new(), MockContainerController::new()).await
    }

    /// Context with the given mock engine and default settings.
    pub async fn with_engine(builder: MockImageBuilder, controller: MockContainerController) -> Self {
        Self::with_settings(builder, controller, RolloutSettings::default()).await
    }

    /// Context with the given mock engine and settings.
    pub async fn with_settings(
        builder: MockImageBuilder,
        controller: MockContainerController,
        settings: RolloutSettings,
    ) -> Self {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let data_dir = temp_dir.path().to_path_buf();
        std::fs::create_dir_all(data_dir.join("uploads")).unwrap();

        let store = Arc::new(FlakyPersistence {
            inner: SqlitePersistence::in_memory().await.unwrap(),
            fail_create_revision: AtomicBool::new(false),
            fail_save_deployment: AtomicBool::new(false),
        });
        let persistence: Arc<dyn Persistence> = store.clone();
        let namespace = persistence.create_namespace("acme").await.unwrap();
        let deployment = persistence
            .create_deployment(&namespace.id, "api")
            .await
            .unwrap();

        let builder = Arc::new(builder);
        let controller = Arc::new(controller);
        let allocator = Arc::new(LoopbackAllocator::with_probe(
            AddressRange::default(),
            Arc::new(AlwaysFree),
        ));

        let orchestrator = RolloutOrchestrator::builder(
            persistence.clone(),
            builder.clone(),
            controller.clone(),
        )
        .address_allocator(allocator.clone())
        .workspaces(WorkspaceManager::new(data_dir.join("workspaces")))
        .settings(settings)
        .build();

        Self {
            store,
            persistence,
            builder,
            controller,
            allocator,
            orchestrator: Arc::new(orchestrator),
            namespace,
            deployment,
            data_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Write a small Node.js build output as a zip under `uploads/`.
    pub fn write_artifact(&self, name: &str) -> PathBuf {
        let path = self.data_dir.join("uploads").join(name);
        write_zip(
            &path,
            &[
                ("package.json", r#"{"type":"module"}"#),
                ("server/index.mjs", "console.log('listening')"),
            ],
        );
        path
    }

    /// A job for `acme/api`.
    pub fn job(&self, artifact: &Path, entrypoint: &str) -> RolloutJob {
        RolloutJob {
            id: JobId::new(),
            namespace_id: self.namespace.id.clone(),
            deployment_id: self.deployment.id.clone(),
            artifact_path: artifact.to_path_buf(),
            entrypoint: entrypoint.to_string(),
        }
    }

    /// Current deployment row.
    pub async fn reload_deployment(&self) -> Deployment {
        self.persistence
            .find_deployment_by_id(&self.deployment.id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Number of workspace directories left on disk.
    pub fn workspace_count(&self) -> usize {
        match std::fs::read_dir(self.data_dir.join("workspaces")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// Write a zip with the given file entries.
pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, body) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}
