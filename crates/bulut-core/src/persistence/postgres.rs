// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::CoreError;
use crate::models::{Deployment, Namespace, NewRevision, Revision};

use super::Persistence;

const NAMESPACE_COLUMNS: &str = "id, name, created_at, updated_at, deleted_at";
const DEPLOYMENT_COLUMNS: &str =
    "id, namespace_id, name, current_container_id, created_at, updated_at, deleted_at";
const REVISION_COLUMNS: &str = "id, deployment_id, image_name, image_tag, image_id, notes, \
     created_at, updated_at, deleted_at";

/// PostgreSQL-backed persistence provider.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and apply pending migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        crate::migrations::run_postgres(&pool).await?;

        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn create_namespace(&self, name: &str) -> Result<Namespace, CoreError> {
        let namespace = Namespace::new(name)?;

        sqlx::query(
            r#"
            INSERT INTO namespaces (id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&namespace.id)
        .bind(&namespace.name)
        .bind(namespace.created_at)
        .bind(namespace.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::on_conflict(e, "namespace", name))?;

        tracing::info!(namespace_id = %namespace.id, name = %namespace.name, "Created namespace");

        Ok(namespace)
    }

    async fn find_namespace_by_id(&self, id: &str) -> Result<Option<Namespace>, CoreError> {
        let row = sqlx::query_as::<_, Namespace>(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>, CoreError> {
        let row = sqlx::query_as::<_, Namespace>(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn create_deployment(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Deployment, CoreError> {
        let deployment = Deployment::new(namespace_id, name)?;

        if self.find_namespace_by_id(namespace_id).await?.is_none() {
            return Err(CoreError::NotFound {
                entity: "namespace",
                id: namespace_id.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO deployments (id, namespace_id, name, current_container_id, created_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $5)
            "#,
        )
        .bind(&deployment.id)
        .bind(&deployment.namespace_id)
        .bind(&deployment.name)
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::on_conflict(e, "deployment", name))?;

        tracing::info!(
            deployment_id = %deployment.id,
            namespace_id = %deployment.namespace_id,
            name = %deployment.name,
            "Created deployment"
        );

        Ok(deployment)
    }

    async fn find_deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, CoreError> {
        let row = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_deployment_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> Result<Option<Deployment>, CoreError> {
        let row = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments \
             WHERE namespace_id = $1 AND name = $2 AND deleted_at IS NULL"
        ))
        .bind(namespace_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_deployment_by_container_id(
        &self,
        namespace_id: &str,
        container_id: &str,
    ) -> Result<Option<Deployment>, CoreError> {
        let row = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments \
             WHERE namespace_id = $1 AND current_container_id = $2 AND deleted_at IS NULL \
             LIMIT 1"
        ))
        .bind(namespace_id)
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn save_deployment(&self, deployment: &Deployment) -> Result<Deployment, CoreError> {
        let row = sqlx::query_as::<_, Deployment>(&format!(
            "UPDATE deployments SET current_container_id = $2, updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {DEPLOYMENT_COLUMNS}"
        ))
        .bind(&deployment.id)
        .bind(&deployment.current_container_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| CoreError::NotFound {
            entity: "deployment",
            id: deployment.id.clone(),
        })
    }

    async fn create_revision(&self, revision: NewRevision) -> Result<Revision, CoreError> {
        let revision = revision.into_revision()?;

        if self
            .find_deployment_by_id(&revision.deployment_id)
            .await?
            .is_none()
        {
            return Err(CoreError::NotFound {
                entity: "deployment",
                id: revision.deployment_id,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO revisions (
                id, deployment_id, image_name, image_tag, image_id, notes, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&revision.id)
        .bind(&revision.deployment_id)
        .bind(&revision.image_name)
        .bind(&revision.image_tag)
        .bind(&revision.image_id)
        .bind(&revision.notes)
        .bind(revision.created_at)
        .bind(revision.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(revision)
    }

    async fn list_revisions(&self, deployment_id: &str) -> Result<Vec<Revision>, CoreError> {
        let rows = sqlx::query_as::<_, Revision>(&format!(
            "SELECT {REVISION_COLUMNS} FROM revisions \
             WHERE deployment_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, image_tag ASC"
        ))
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn latest_revision(&self, deployment_id: &str) -> Result<Option<Revision>, CoreError> {
        let row = sqlx::query_as::<_, Revision>(&format!(
            "SELECT {REVISION_COLUMNS} FROM revisions \
             WHERE deployment_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, image_tag DESC \
             LIMIT 1"
        ))
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
