// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for bulut-deployer.

use std::time::Duration;

use thiserror::Error;

/// Rollout errors.
///
/// Every variant is terminal for the job that produced it; nothing is retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The archive is corrupt or an entry would escape the workspace.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// The build descriptor could not be written.
    #[error("Descriptor write failed: {0}")]
    DescriptorWriteFailed(String),

    /// The container engine rejected the image build.
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// Persistence operation failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] bulut_core::CoreError),

    /// The deployment named by a job does not exist.
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Every candidate address is taken.
    #[error("No address available in {range} for port {port}")]
    NoAddressAvailable {
        /// Human-readable candidate range.
        range: String,
        /// Port that was probed.
        port: u16,
    },

    /// The container could not be created or started.
    #[error("Container start failed: {0}")]
    ContainerStartFailed(String),

    /// The previous container could not be removed.
    #[error("Container removal failed: {0}")]
    ContainerRemovalFailed(String),

    /// An engine call did not finish in time.
    #[error("Deadline exceeded: {operation} did not finish within {timeout:?}")]
    DeadlineExceeded {
        /// The engine operation that timed out.
        operation: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Job validation failed at submission time.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExtractionFailed(_) => "EXTRACTION_FAILED",
            Self::DescriptorWriteFailed(_) => "DESCRIPTOR_WRITE_FAILED",
            Self::BuildFailed(_) => "BUILD_FAILED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::DeploymentNotFound(_) => "DEPLOYMENT_NOT_FOUND",
            Self::NoAddressAvailable { .. } => "NO_ADDRESS_AVAILABLE",
            Self::ContainerStartFailed(_) => "CONTAINER_START_FAILED",
            Self::ContainerRemovalFailed(_) => "CONTAINER_REMOVAL_FAILED",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::InvalidJob(_) => "INVALID_JOB",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type using the deployer Error.
pub type Result<T> = std::result::Result<T, Error>;
