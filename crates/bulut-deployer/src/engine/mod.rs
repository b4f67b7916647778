// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container engine adapters.
//!
//! The orchestrator talks to the engine through two traits: [`ImageBuilder`]
//! builds and tags images, [`ContainerController`] replaces running
//! containers. [`DockerCli`] implements both by shelling out to a
//! docker-compatible CLI; the mocks keep everything in memory.

pub mod docker;
pub mod mock;
mod tag;
mod traits;

pub use docker::DockerCli;
pub use mock::{MockBehavior, MockContainer, MockContainerController, MockImageBuilder};
pub use tag::TagClock;
pub use traits::*;
