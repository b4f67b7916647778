// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence tests for bulut-core.
//!
//! Run with `TEST_BULUT_DATABASE_URL=postgres://...`; skipped otherwise.

use bulut_core::models::NewRevision;
use bulut_core::persistence::{Persistence, PostgresPersistence};
use bulut_core::CoreError;
use uuid::Uuid;

/// Skip test if database URL is not set
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_BULUT_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_BULUT_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_persistence() -> PostgresPersistence {
    let database_url = std::env::var("TEST_BULUT_DATABASE_URL").unwrap();
    PostgresPersistence::connect(&database_url)
        .await
        .expect("Failed to connect to database")
}

fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8])
}

#[tokio::test]
async fn test_namespace_roundtrip() {
    skip_if_no_db!();
    let persistence = get_persistence().await;
    let name = unique_name("ns");

    let created = persistence.create_namespace(&name).await.unwrap();
    let found = persistence
        .find_namespace_by_name(&name)
        .await
        .unwrap()
        .expect("namespace should exist");

    assert_eq!(found.id, created.id);
    assert!(found.deleted_at.is_none());
}

#[tokio::test]
async fn test_duplicate_namespace_is_conflict() {
    skip_if_no_db!();
    let persistence = get_persistence().await;
    let name = unique_name("ns");

    persistence.create_namespace(&name).await.unwrap();
    let err = persistence.create_namespace(&name).await.unwrap_err();

    assert!(matches!(err, CoreError::AlreadyExists { .. }));
}

#[tokio::test]
async fn test_deployment_container_pointer_and_revisions() {
    skip_if_no_db!();
    let persistence = get_persistence().await;
    let ns = persistence.create_namespace(&unique_name("ns")).await.unwrap();
    let mut deployment = persistence.create_deployment(&ns.id, "api").await.unwrap();

    for tag in ["20250101120000000", "20250101120000001"] {
        persistence
            .create_revision(NewRevision {
                deployment_id: deployment.id.clone(),
                image_name: format!("bulut-{}-{}", ns.id, deployment.id),
                image_tag: tag.to_string(),
                image_id: format!("sha256:{}", tag),
                notes: Some("test".to_string()),
            })
            .await
            .unwrap();
    }

    deployment.current_container_id = Some("c0ffee".to_string());
    let saved = persistence.save_deployment(&deployment).await.unwrap();
    assert_eq!(saved.current_container(), Some("c0ffee"));

    let revisions = persistence.list_revisions(&deployment.id).await.unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions[0].image_tag < revisions[1].image_tag);

    let latest = persistence
        .latest_revision(&deployment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.image_tag, "20250101120000001");
}
