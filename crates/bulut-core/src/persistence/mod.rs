//! Persistence interfaces and backends for bulut-core.
//!
//! The rollout engine only ever sees [`Persistence`]; which backend sits
//! behind it is decided by the database URL at startup (see [`connect`]).

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::{Deployment, Namespace, NewRevision, Revision};

/// Persistence interface used by the deployer.
///
/// Lookups return `Ok(None)` when the row is missing so callers can tell
/// "not found" apart from a storage failure. Soft-deleted rows are invisible.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a namespace. Fails with `AlreadyExists` on a duplicate live name.
    async fn create_namespace(&self, name: &str) -> Result<Namespace, CoreError>;

    /// Fetch a namespace by id.
    async fn find_namespace_by_id(&self, id: &str) -> Result<Option<Namespace>, CoreError>;

    /// Fetch a namespace by its unique name.
    async fn find_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>, CoreError>;

    /// Insert a deployment inside a namespace.
    ///
    /// Fails with `NotFound` if the namespace is missing and with
    /// `AlreadyExists` if the name is taken within that namespace.
    async fn create_deployment(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Deployment, CoreError>;

    /// Fetch a deployment by id.
    async fn find_deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, CoreError>;

    /// Fetch a deployment by name within a namespace.
    async fn find_deployment_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Option<Deployment>, CoreError>;

    /// Fetch the deployment currently pointing at `container_id`.
    async fn find_deployment_by_container_id(
        &self,
        namespace_id: &str,
        container_id: &str,
    ) -> Result<Option<Deployment>, CoreError>;

    /// Persist the mutable fields of a deployment (its current container)
    /// and bump `updated_at`. Returns the stored row.
    async fn save_deployment(&self, deployment: &Deployment) -> Result<Deployment, CoreError>;

    /// Append a revision. Revisions are never updated or deleted.
    async fn create_revision(&self, revision: NewRevision) -> Result<Revision, CoreError>;

    /// All revisions of a deployment, oldest first.
    async fn list_revisions(&self, deployment_id: &str) -> Result<Vec<Revision>, CoreError>;

    /// The most recent revision of a deployment.
    async fn latest_revision(&self, deployment_id: &str) -> Result<Option<Revision>, CoreError> {
        Ok(self.list_revisions(deployment_id).await?.pop())
    }
}

/// Connect to the database named by `url` and run its migrations.
///
/// `sqlite:` URLs select [`SqlitePersistence`]; everything else is treated
/// as PostgreSQL.
pub async fn connect(url: &str) -> Result<Arc<dyn Persistence>, CoreError> {
    if url.starts_with("sqlite:") {
        let persistence = SqlitePersistence::connect(url).await?;
        tracing::info!("Using SQLite persistence");
        Ok(Arc::new(persistence))
    } else {
        let persistence = PostgresPersistence::connect(url).await?;
        tracing::info!("Using PostgreSQL persistence");
        Ok(Arc::new(persistence))
    }
}
