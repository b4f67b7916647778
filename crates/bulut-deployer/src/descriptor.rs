// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build descriptor synthesis.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DEFAULT_BASE_IMAGE, DEFAULT_CONTAINER_PORT, DEFAULT_ENTRYPOINT};
use crate::error::{Error, Result};

/// Fixed descriptor filename inside the workspace root.
pub const DESCRIPTOR_FILE: &str = "Dockerfile";

/// Container working directory the artifact is copied into.
pub const CONTAINER_WORKDIR: &str = "/app";

/// What to do when the artifact already ships a descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorPolicy {
    /// Always replace it with the synthesized one.
    #[default]
    Overwrite,
    /// Keep the artifact's own descriptor.
    PreserveExisting,
}

impl FromStr for DescriptorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "preserve" | "preserve_existing" | "preserve-existing" => Ok(Self::PreserveExisting),
            other => Err(format!("unknown descriptor policy: {}", other)),
        }
    }
}

/// Result of [`DescriptorTemplate::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorOutcome {
    /// A descriptor was synthesized and written.
    Written,
    /// The artifact's descriptor was kept.
    Preserved,
}

/// Parameters of the synthesized descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorTemplate {
    /// Base runtime image.
    pub base_image: String,
    /// Port declared and exposed by the image.
    pub container_port: u16,
    /// Entrypoint used when a job omits one.
    pub default_entrypoint: String,
}

impl Default for DescriptorTemplate {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            default_entrypoint: DEFAULT_ENTRYPOINT.to_string(),
        }
    }
}

impl DescriptorTemplate {
    /// Render the descriptor for `entrypoint`.
    ///
    /// An empty entrypoint falls back to the default. The value is embedded
    /// as a JSON string, so quotes and backslashes cannot change the shape
    /// of the start command array. Control characters are rejected.
    pub fn render(&self, entrypoint: &str) -> Result<String> {
        let entrypoint = if entrypoint.is_empty() {
            self.default_entrypoint.as_str()
        } else {
            entrypoint
        };

        if entrypoint.chars().any(char::is_control) {
            return Err(Error::DescriptorWriteFailed(format!(
                "entrypoint contains control characters: {:?}",
                entrypoint
            )));
        }

        let command = serde_json::to_string(&["node", entrypoint])
            .map_err(|e| Error::DescriptorWriteFailed(e.to_string()))?;

        Ok(format!(
            "FROM {base}\n\
             WORKDIR {workdir}\n\
             COPY . ./\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD {command}\n",
            base = self.base_image,
            workdir = CONTAINER_WORKDIR,
            port = self.container_port,
            command = command,
        ))
    }

    /// Write the descriptor into `workspace_dir` according to `policy`.
    pub async fn ensure(
        &self,
        workspace_dir: &Path,
        entrypoint: &str,
        policy: DescriptorPolicy,
    ) -> Result<DescriptorOutcome> {
        let path = workspace_dir.join(DESCRIPTOR_FILE);

        if policy == DescriptorPolicy::PreserveExisting
            && tokio::fs::try_exists(&path).await.unwrap_or(false)
        {
            debug!(path = %path.display(), "Keeping descriptor shipped with the artifact");
            return Ok(DescriptorOutcome::Preserved);
        }

        let contents = self.render(entrypoint)?;
        tokio::fs::write(&path, contents).await.map_err(|e| {
            Error::DescriptorWriteFailed(format!("failed to write {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "Descriptor written");
        Ok(DescriptorOutcome::Written)
    }
}
