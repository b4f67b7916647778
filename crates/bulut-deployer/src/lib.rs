// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulut Deployer - Build-and-Rollout Engine
//!
//! Turns an uploaded build artifact into a running, addressable container for
//! a deployment, replacing the previous container and recording a revision.
//!
//! # Architecture
//!
//! ```text
//!   submit_build(namespace, deployment, archive, entrypoint)
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ BuildQueue  (validation, JobTracker, Semaphore worker pool)         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                          │ spawned task
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ RolloutOrchestrator  (per-deployment lock, state machine)           │
//! │                                                                     │
//! │  Workspace ─► Descriptor ─► ImageBuilder ─► RevisionRecorder        │
//! │      ─► ContainerController (remove old) ─► AddressAllocator        │
//! │      ─► ContainerController (run new) ─► save deployment ─► cleanup │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │                          │
//!            ▼                          ▼
//!   ┌──────────────────┐      ┌──────────────────────┐
//!   │ docker CLI       │      │ bulut-core           │
//!   │ (tokio::process) │      │ (PostgreSQL/SQLite)  │
//!   └──────────────────┘      └──────────────────────┘
//! ```
//!
//! # Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`workspace`] | Per-job directory, zip extraction, removal of directory and archive |
//! | [`descriptor`] | Synthesized `Dockerfile` with an escaped entrypoint |
//! | [`engine`] | Image build/tag/inspect and container create/start/remove |
//! | [`address`] | Loopback address probing with an in-process reservation table |
//! | [`revision`] | Append-only revision records |
//! | [`orchestrator`] | The rollout state machine |
//! | [`locks`] | Per-deployment mutual exclusion |
//! | [`jobs`] | Job status tracking |
//! | [`queue`] | Job submission and the worker pool |
//! | [`sweeper`] | Removal of workspaces orphaned by a crash |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables read at
//! startup.

#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod locks;
pub mod orchestrator;
pub mod queue;
pub mod revision;
pub mod runtime;
pub mod sweeper;
pub mod workspace;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use jobs::{JobId, JobStatus, JobTracker};
pub use orchestrator::{RolloutJob, RolloutOrchestrator, RolloutOutcome, RolloutState};
pub use queue::BuildQueue;
pub use runtime::DeployerRuntime;
