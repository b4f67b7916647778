// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Simulates image builds and container lifecycles in memory. Container names
//! are unique among live containers, like a real engine.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::tag::TagClock;
use super::traits::*;
use crate::error::{Error, Result};

/// How a mock call should behave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MockBehavior {
    /// Succeed.
    #[default]
    Succeed,
    /// Fail with the given engine message.
    Fail(String),
    /// Never return.
    Hang,
}

/// Mock image builder.
pub struct MockImageBuilder {
    tags: TagClock,
    builds: Mutex<Vec<BuiltImage>>,
    counter: AtomicU64,
    /// Behaviour of every build
    pub behavior: MockBehavior,
    /// Delay before a build completes
    pub build_delay: Duration,
}

impl Default for MockImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageBuilder {
    /// Create a builder whose builds succeed.
    pub fn new() -> Self {
        Self {
            tags: TagClock::new(),
            builds: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            behavior: MockBehavior::Succeed,
            build_delay: Duration::ZERO,
        }
    }

    /// Create a builder whose builds fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            behavior: MockBehavior::Fail(message.to_string()),
            ..Self::new()
        }
    }

    /// Create a builder whose builds never finish.
    pub fn hanging() -> Self {
        Self {
            behavior: MockBehavior::Hang,
            ..Self::new()
        }
    }

    /// Images built so far, oldest first.
    pub async fn builds(&self) -> Vec<BuiltImage> {
        self.builds.lock().await.clone()
    }
}

#[async_trait]
impl ImageBuilder for MockImageBuilder {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn build(&self, context_dir: &Path, image_repo: &str) -> Result<BuiltImage> {
        if !self.build_delay.is_zero() {
            tokio::time::sleep(self.build_delay).await;
        }

        match &self.behavior {
            MockBehavior::Succeed => {}
            MockBehavior::Fail(message) => return Err(Error::BuildFailed(message.clone())),
            MockBehavior::Hang => return std::future::pending().await,
        }

        if !context_dir.is_dir() {
            return Err(Error::BuildFailed(format!(
                "build context {} does not exist",
                context_dir.display()
            )));
        }

        let image_tag = self.tags.next_tag();
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let image = BuiltImage {
            image_id: format!("sha256:{:064x}", n),
            image_name: format!("{}:{}", image_repo, image_tag),
            image_tag,
        };

        self.builds.lock().await.push(image.clone());
        Ok(image)
    }
}

/// A container tracked by [`MockContainerController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    /// Container id
    pub id: String,
    /// Container name
    pub name: String,
    /// Image it was started from
    pub image_name: String,
    /// Published host socket
    pub bound_address: SocketAddrV4,
}

/// Mock container controller.
pub struct MockContainerController {
    containers: Mutex<HashMap<String, MockContainer>>,
    removed: Mutex<Vec<String>>,
    counter: AtomicU64,
    /// Behaviour of `run`
    pub run_behavior: MockBehavior,
    /// Behaviour of `stop_and_remove` for containers that exist
    pub remove_behavior: MockBehavior,
}

impl Default for MockContainerController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContainerController {
    /// Create a controller whose calls succeed.
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            run_behavior: MockBehavior::Succeed,
            remove_behavior: MockBehavior::Succeed,
        }
    }

    /// Create a controller whose containers fail to start.
    pub fn failing_start(message: &str) -> Self {
        Self {
            run_behavior: MockBehavior::Fail(message.to_string()),
            ..Self::new()
        }
    }

    /// Create a controller that creates containers but never finishes starting them.
    pub fn hanging_start() -> Self {
        Self {
            run_behavior: MockBehavior::Hang,
            ..Self::new()
        }
    }

    /// Create a controller that cannot remove existing containers.
    pub fn failing_remove(message: &str) -> Self {
        Self {
            remove_behavior: MockBehavior::Fail(message.to_string()),
            ..Self::new()
        }
    }

    /// Whether a container with this id is running.
    pub async fn is_running(&self, container_id: &str) -> bool {
        self.containers.lock().await.contains_key(container_id)
    }

    /// Running containers.
    pub async fn running(&self) -> Vec<MockContainer> {
        self.containers.lock().await.values().cloned().collect()
    }

    /// Ids of removed containers, in removal order.
    pub async fn removed(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }

    /// Register a running container without going through `run`.
    pub async fn insert(&self, container: MockContainer) {
        self.containers
            .lock()
            .await
            .insert(container.id.clone(), container);
    }
}

#[async_trait]
impl ContainerController for MockContainerController {
    async fn stop_and_remove(&self, container: &str) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let id = containers
            .values()
            .find(|c| c.id == container || c.name == container)
            .map(|c| c.id.clone());

        let Some(id) = id else {
            return Ok(());
        };

        match &self.remove_behavior {
            MockBehavior::Succeed => {}
            MockBehavior::Fail(message) => {
                return Err(Error::ContainerRemovalFailed(message.clone()));
            }
            MockBehavior::Hang => {
                drop(containers);
                return std::future::pending().await;
            }
        }

        containers.remove(&id);
        self.removed.lock().await.push(id);
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> Result<RunningContainer> {
        if let MockBehavior::Fail(message) = &self.run_behavior {
            return Err(Error::ContainerStartFailed(message.clone()));
        }

        let mut containers = self.containers.lock().await;
        if containers.values().any(|c| c.name == request.container_name) {
            return Err(Error::ContainerStartFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                request.container_name
            )));
        }

        let bound_address = SocketAddrV4::new(request.address, request.host_port);
        if containers.values().any(|c| c.bound_address == bound_address) {
            return Err(Error::ContainerStartFailed(format!(
                "Bind for {} failed: port is already allocated",
                bound_address
            )));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let container = MockContainer {
            id: format!("mock-{:012x}", n),
            name: request.container_name.clone(),
            image_name: request.image_name.clone(),
            bound_address,
        };
        containers.insert(container.id.clone(), container.clone());

        // Created, but `start` never returns.
        if self.run_behavior == MockBehavior::Hang {
            drop(containers);
            return std::future::pending().await;
        }

        Ok(RunningContainer {
            container_id: container.id,
            bound_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn request(name: &str, last_octet: u8) -> RunRequest {
        RunRequest {
            image_name: "repo:1".to_string(),
            container_name: name.to_string(),
            address: Ipv4Addr::new(127, 0, 0, last_octet),
            container_port: 8080,
            host_port: 1234,
        }
    }

    #[tokio::test]
    async fn test_mock_build_produces_distinct_images() {
        let builder = MockImageBuilder::new();
        let dir = std::env::temp_dir();

        let a = builder.build(&dir, "repo").await.unwrap();
        let b = builder.build(&dir, "repo").await.unwrap();

        assert_ne!(a.image_id, b.image_id);
        assert!(a.image_tag < b.image_tag);
        assert_eq!(builder.builds().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_container_names_are_unique() {
        let controller = MockContainerController::new();
        let first = controller.run(&request("bulut-a", 100)).await.unwrap();

        let err = controller.run(&request("bulut-a", 101)).await.unwrap_err();
        assert!(matches!(err, Error::ContainerStartFailed(_)));

        controller.stop_and_remove("bulut-a").await.unwrap();
        assert!(!controller.is_running(&first.container_id).await);
        assert_eq!(controller.removed().await, vec![first.container_id]);
        controller.run(&request("bulut-a", 101)).await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_hanging_start_leaves_created_container() {
        let controller = MockContainerController::hanging_start();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            controller.run(&request("bulut-a", 100)),
        )
        .await;

        assert!(result.is_err());
        let running = controller.running().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "bulut-a");
    }

    #[tokio::test]
    async fn test_mock_remove_missing_is_ok() {
        let controller = MockContainerController::failing_remove("boom");
        assert!(controller.stop_and_remove("nothing").await.is_ok());
    }
}
