// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job submission and runtime tests.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bulut_deployer::engine::{MockContainerController, MockImageBuilder};
use bulut_deployer::{BuildQueue, Config, DeployerRuntime, Error, RolloutState};
use common::{AlwaysFree, TestContext};

#[tokio::test]
async fn test_submit_returns_before_rollout_finishes() {
    let mut builder = MockImageBuilder::new();
    builder.build_delay = Duration::from_millis(100);
    let ctx = TestContext::with_engine(builder, MockContainerController::new()).await;
    let queue = BuildQueue::new(ctx.orchestrator.clone(), 2);
    let artifact = ctx.write_artifact("valid.zip");

    let job_id = queue
        .submit_build(&ctx.namespace.id, &ctx.deployment.id, &artifact, "")
        .await
        .unwrap();

    let accepted = queue.tracker().get(&job_id).unwrap();
    assert!(!accepted.is_finished());

    let status = queue.tracker().wait(&job_id).await.unwrap();
    assert_eq!(status.state, RolloutState::CleanedUp);
    assert!(status.container_id.is_some());
    assert!(status.revision_id.is_some());
    assert_eq!(
        ctx.reload_deployment().await.current_container(),
        status.container_id.as_deref()
    );
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_failed_job_is_visible_in_tracker() {
    let ctx = TestContext::with_engine(
        MockImageBuilder::failing("no space left on device"),
        MockContainerController::new(),
    )
    .await;
    let queue = BuildQueue::new(ctx.orchestrator.clone(), 1);
    let artifact = ctx.write_artifact("valid.zip");

    let job_id = queue
        .submit_build(&ctx.namespace.id, &ctx.deployment.id, &artifact, "")
        .await
        .unwrap();
    let status = queue.tracker().wait(&job_id).await.unwrap();

    assert_eq!(status.state, RolloutState::Failed);
    assert_eq!(status.failed_at, Some(RolloutState::DescriptorReady));
    assert_eq!(status.error_code.as_deref(), Some("BUILD_FAILED"));
    assert!(status.error.unwrap().contains("no space left on device"));
}

#[tokio::test]
async fn test_submit_validates_synchronously() {
    let ctx = TestContext::new().await;
    let queue = BuildQueue::new(ctx.orchestrator.clone(), 1);
    let artifact = ctx.write_artifact("valid.zip");

    let err = queue
        .submit_build("", &ctx.deployment.id, &artifact, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));

    let err = queue
        .submit_build(
            &ctx.namespace.id,
            &ctx.deployment.id,
            ctx.data_dir.join("uploads/missing.zip"),
            "",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));

    let err = queue
        .submit_build(&ctx.namespace.id, "nope", &artifact, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeploymentNotFound(_)));

    // Rejected jobs do not consume the archive.
    assert!(artifact.exists());
    assert!(queue.tracker().list().is_empty());
}

#[tokio::test]
async fn test_drain_waits_for_all_jobs() {
    let ctx = TestContext::new().await;
    let queue = BuildQueue::new(ctx.orchestrator.clone(), 1);

    let mut ids = Vec::new();
    for name in ["a.zip", "b.zip", "c.zip"] {
        let artifact = ctx.write_artifact(name);
        ids.push(
            queue
                .submit_build(&ctx.namespace.id, &ctx.deployment.id, &artifact, "")
                .await
                .unwrap(),
        );
    }

    queue.drain().await;

    assert_eq!(queue.in_flight(), 0);
    for id in &ids {
        assert_eq!(queue.tracker().get(id).unwrap().state, RolloutState::CleanedUp);
    }
    assert_eq!(
        ctx.persistence.list_revisions(&ctx.deployment.id).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_runtime_end_to_end_with_mocks() {
    let ctx = TestContext::new().await;
    let data_dir = tempfile::TempDir::new().unwrap();
    let vars: HashMap<&str, String> = HashMap::from([
        ("BULUT_DATABASE_URL", "sqlite::memory:".to_string()),
        ("BULUT_DATA_DIR", data_dir.path().display().to_string()),
    ]);
    let config = Config::from_lookup(|var| vars.get(var).cloned()).unwrap();

    let runtime = DeployerRuntime::builder()
        .config(config)
        .persistence(ctx.persistence.clone())
        .image_builder(Arc::new(MockImageBuilder::new()))
        .container_controller(Arc::new(MockContainerController::new()))
        .address_allocator(Arc::new(
            bulut_deployer::address::LoopbackAllocator::with_probe(
                Default::default(),
                Arc::new(AlwaysFree),
            ),
        ))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(runtime.is_running());

    let upload = runtime.uploads_dir().join("upload.zip");
    common::write_zip(&upload, &[("server/index.mjs", "x")]);

    let job_id = runtime
        .queue()
        .submit_build(&ctx.namespace.id, &ctx.deployment.id, &upload, "")
        .await
        .unwrap();
    let status = runtime.tracker().wait(&job_id).await.unwrap();

    assert_eq!(status.state, RolloutState::CleanedUp);
    assert!(!upload.exists());
    assert_eq!(
        std::fs::read_dir(data_dir.path().join("workspaces"))
            .unwrap()
            .count(),
        0
    );

    runtime.shutdown().await.unwrap();
}
