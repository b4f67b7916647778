// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Revision recording.

use std::sync::Arc;

use bulut_core::{NewRevision, Persistence, Revision};
use tracing::info;

use crate::engine::BuiltImage;
use crate::error::Result;

/// Appends revisions for successful image builds.
///
/// There is no update or delete path. A storage failure surfaces as
/// [`Error::Persistence`](crate::Error::Persistence) and must stop the rollout.
#[derive(Clone)]
pub struct RevisionRecorder {
    persistence: Arc<dyn Persistence>,
}

impl RevisionRecorder {
    /// Create a recorder.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Record `image` as the newest revision of `deployment_id`.
    pub async fn record(
        &self,
        deployment_id: &str,
        image: &BuiltImage,
        notes: Option<String>,
    ) -> Result<Revision> {
        let revision = self
            .persistence
            .create_revision(NewRevision {
                deployment_id: deployment_id.to_string(),
                image_name: image.image_name.clone(),
                image_tag: image.image_tag.clone(),
                image_id: image.image_id.clone(),
                notes,
            })
            .await?;

        info!(
            deployment_id = %deployment_id,
            revision_id = %revision.id,
            image_name = %revision.image_name,
            "Revision recorded"
        );

        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulut_core::persistence::SqlitePersistence;

    fn image(tag: &str) -> BuiltImage {
        BuiltImage {
            image_id: format!("sha256:{}", tag),
            image_name: format!("bulut-ns-dep:{}", tag),
            image_tag: tag.to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_appends_in_order() {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let ns = persistence.create_namespace("acme").await.unwrap();
        let dep = persistence.create_deployment(&ns.id, "api").await.unwrap();

        let recorder = RevisionRecorder::new(persistence.clone());
        recorder
            .record(&dep.id, &image("20250301000000000"), None)
            .await
            .unwrap();
        let second = recorder
            .record(&dep.id, &image("20250301000000001"), Some("sha256=00".into()))
            .await
            .unwrap();

        let revisions = persistence.list_revisions(&dep.id).await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].id, second.id);
        assert_eq!(revisions[1].notes.as_deref(), Some("sha256=00"));
    }

    #[tokio::test]
    async fn test_record_for_missing_deployment_fails() {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let recorder = RevisionRecorder::new(persistence);

        let err = recorder
            .record("missing", &image("20250301000000000"), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
    }
}
