// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for bulut-deployer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::address::AddressRange;
use crate::descriptor::DescriptorPolicy;

/// Container-internal port written into every descriptor.
pub const DEFAULT_CONTAINER_PORT: u16 = 8080;

/// Host port bound on every allocated address.
pub const DEFAULT_HOST_PORT: u16 = 1234;

/// Entrypoint used when a job does not name one.
pub const DEFAULT_ENTRYPOINT: &str = "server/index.mjs";

/// Base runtime image for synthesized descriptors.
pub const DEFAULT_BASE_IMAGE: &str = "node:18-alpine";

/// Deployer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `postgres://` or `sqlite:` URL
    pub database_url: String,
    /// Root for uploaded archives and build workspaces
    pub data_dir: PathBuf,
    /// Container engine CLI binary
    pub docker_bin: String,
    /// Base image for synthesized descriptors
    pub base_image: String,
    /// Entrypoint used when a job omits one
    pub default_entrypoint: String,
    /// Port the application listens on inside the container
    pub container_port: u16,
    /// Port bound on the host for every deployment
    pub host_port: u16,
    /// Candidate loopback addresses
    pub address_range: AddressRange,
    /// Upper bound for an image build
    pub build_timeout: Duration,
    /// Upper bound for every other engine call
    pub engine_timeout: Duration,
    /// Worker pool width
    pub max_concurrent_builds: usize,
    /// Whether an artifact's own descriptor is kept
    pub descriptor_policy: DescriptorPolicy,
    /// Age after which an orphaned workspace is swept
    pub workspace_max_age: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("BULUT_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or(ConfigError::MissingEnvVar(
                "BULUT_DATABASE_URL or DATABASE_URL",
            ))?;

        let data_dir = PathBuf::from(lookup("BULUT_DATA_DIR").unwrap_or_else(|| ".data".into()));

        Ok(Self {
            database_url,
            data_dir,
            docker_bin: lookup("BULUT_DOCKER_BIN").unwrap_or_else(|| "docker".to_string()),
            base_image: lookup("BULUT_BASE_IMAGE")
                .unwrap_or_else(|| DEFAULT_BASE_IMAGE.to_string()),
            default_entrypoint: lookup("BULUT_DEFAULT_ENTRYPOINT")
                .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string()),
            container_port: parse_var(&lookup, "BULUT_CONTAINER_PORT", DEFAULT_CONTAINER_PORT)?,
            host_port: parse_var(&lookup, "BULUT_HOST_PORT", DEFAULT_HOST_PORT)?,
            address_range: parse_address_range(&lookup)?,
            build_timeout: Duration::from_secs(parse_var(
                &lookup,
                "BULUT_BUILD_TIMEOUT_SECS",
                600,
            )?),
            engine_timeout: Duration::from_secs(parse_var(
                &lookup,
                "BULUT_ENGINE_TIMEOUT_SECS",
                60,
            )?),
            max_concurrent_builds: parse_var(&lookup, "BULUT_MAX_CONCURRENT_BUILDS", 4usize)?
                .max(1),
            descriptor_policy: parse_var(
                &lookup,
                "BULUT_DESCRIPTOR_POLICY",
                DescriptorPolicy::Overwrite,
            )?,
            workspace_max_age: Duration::from_secs(parse_var(
                &lookup,
                "BULUT_WORKSPACE_MAX_AGE_SECS",
                24 * 3600,
            )?),
        })
    }

    /// Directory holding per-job build workspaces.
    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    /// Directory holding uploaded archives awaiting a build.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.clone(),
        }),
        None => Ok(default),
    }
}

fn parse_address_range<F>(lookup: &F) -> Result<AddressRange, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = lookup("BULUT_ADDRESS_PREFIX").unwrap_or_else(|| "127.0.0".to_string());
    let range = lookup("BULUT_ADDRESS_RANGE").unwrap_or_else(|| "100-255".to_string());

    AddressRange::parse(&prefix, &range).ok_or_else(|| ConfigError::InvalidValue {
        var: "BULUT_ADDRESS_PREFIX/BULUT_ADDRESS_RANGE",
        value: format!("{}.{}", prefix, range),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}
