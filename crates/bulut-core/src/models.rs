// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity records shared by every persistence backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Longest name accepted for namespaces and deployments.
pub const MAX_NAME_LEN: usize = 63;

/// A named grouping that owns a set of deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Namespace {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Unique among live namespaces.
    pub name: String,
    /// When the namespace was created.
    pub created_at: DateTime<Utc>,
    /// When the namespace was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Namespace {
    /// Build a fresh namespace record with a new id.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("name", &name)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

/// A long-lived deploy target mapping to at most one running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Owning namespace. Never changes after creation.
    pub namespace_id: String,
    /// Unique within the namespace.
    pub name: String,
    /// Container currently serving this deployment, empty until the first rollout.
    pub current_container_id: Option<String>,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When the deployment was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Build a fresh deployment record inside `namespace_id`.
    pub fn new(namespace_id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace_id = namespace_id.into();
        let name = name.into();
        if namespace_id.is_empty() {
            return Err(CoreError::validation("namespace_id", "must not be empty"));
        }
        validate_name("name", &name)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace_id,
            name,
            current_container_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// The current container id, treating an empty string as absent.
    pub fn current_container(&self) -> Option<&str> {
        self.current_container_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// An immutable record of one successful image build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Revision {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Owning deployment.
    pub deployment_id: String,
    /// Image repository the build was tagged into.
    pub image_name: String,
    /// Timestamp tag of this build.
    pub image_tag: String,
    /// Engine-assigned image identifier; the durable reference.
    pub image_id: String,
    /// Free-text notes.
    pub notes: Option<String>,
    /// When the revision was recorded.
    pub created_at: DateTime<Utc>,
    /// Equal to `created_at`; revisions are never updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for appending a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    /// Owning deployment.
    pub deployment_id: String,
    /// Image repository.
    pub image_name: String,
    /// Build tag.
    pub image_tag: String,
    /// Engine image identifier.
    pub image_id: String,
    /// Optional notes.
    pub notes: Option<String>,
}

impl NewRevision {
    /// Validate and stamp the revision with an id and creation time.
    pub fn into_revision(self) -> Result<Revision> {
        for (field, value) in [
            ("deployment_id", &self.deployment_id),
            ("image_name", &self.image_name),
            ("image_tag", &self.image_tag),
            ("image_id", &self.image_id),
        ] {
            if value.is_empty() {
                return Err(CoreError::validation(field, "must not be empty"));
            }
        }
        let now = Utc::now();
        Ok(Revision {
            id: uuid::Uuid::new_v4().to_string(),
            deployment_id: self.deployment_id,
            image_name: self.image_name,
            image_tag: self.image_tag,
            image_id: self.image_id,
            notes: self.notes,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::validation(
            field,
            format!("must be at most {} bytes", MAX_NAME_LEN),
        ));
    }
    Ok(())
}
