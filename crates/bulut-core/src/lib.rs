// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bulut Core - Deployment Data Model and Persistence
//!
//! This crate owns the three entities the rollout engine manipulates and the
//! storage layer behind them:
//!
//! ```text
//! ┌──────────────┐ 1      * ┌──────────────┐ 1      * ┌──────────────┐
//! │  Namespace   │─────────►│  Deployment  │─────────►│   Revision   │
//! │  name (uniq) │          │  name        │          │  image_name  │
//! └──────────────┘          │  container ● │          │  image_tag   │
//!                           └──────────────┘          │  image_id    │
//!                                                     └──────────────┘
//! ```
//!
//! Every entity carries an opaque id, creation/update timestamps and a nullable
//! soft-delete timestamp. Revisions are append-only.
//!
//! # Backends
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | PostgreSQL | [`persistence::PostgresPersistence`] | production |
//! | SQLite | [`persistence::SqlitePersistence`] | single-host installs, tests |
//!
//! Both implement [`persistence::Persistence`], which is what the deployer
//! depends on.

#![deny(missing_docs)]

/// Error types for persistence operations.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Namespace, deployment and revision records.
pub mod models;

/// Persistence trait and its PostgreSQL / SQLite backends.
pub mod persistence;

pub use error::CoreError;
pub use models::{Deployment, Namespace, NewRevision, Revision};
pub use persistence::Persistence;
