// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine trait definitions.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An image produced by [`ImageBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    /// Engine's canonical image identifier (e.g. `sha256:...`)
    pub image_id: String,
    /// `{repo}:{tag}`
    pub image_name: String,
    /// Timestamp tag
    pub image_tag: String,
}

/// Parameters for starting a container.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image to run (`repo:tag`)
    pub image_name: String,
    /// Deterministic container name
    pub container_name: String,
    /// Host address the port is published on
    pub address: Ipv4Addr,
    /// Port inside the container
    pub container_port: u16,
    /// Port on the host
    pub host_port: u16,
}

/// A started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    /// Engine container identifier
    pub container_id: String,
    /// Host socket the container is reachable on
    pub bound_address: SocketAddrV4,
}

/// Builds container images from a directory.
///
/// Engine errors are passed through unmodified as [`Error::BuildFailed`](crate::Error::BuildFailed).
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Engine identifier (e.g., "docker", "mock")
    fn engine_type(&self) -> &'static str;

    /// Build `context_dir` as `{image_repo}:{tag}`, retag it as
    /// `{image_repo}:latest` and resolve its image identifier.
    async fn build(&self, context_dir: &Path, image_repo: &str) -> Result<BuiltImage>;
}

/// Starts and removes containers.
#[async_trait]
pub trait ContainerController: Send + Sync {
    /// Force-remove a container and its volumes by id or name.
    ///
    /// A container that does not exist counts as removed.
    async fn stop_and_remove(&self, container: &str) -> Result<()>;

    /// Create and start a container.
    ///
    /// If the container is created but fails to start it is removed before
    /// the error is returned.
    async fn run(&self, request: &RunRequest) -> Result<RunningContainer>;
}
