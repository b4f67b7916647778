// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-deployment mutual exclusion.
//!
//! Rollouts of the same deployment run one at a time; rollouts of different
//! deployments do not contend. Waiters are served in FIFO order by the
//! underlying `tokio::sync::Mutex`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Lock table keyed by deployment id.
#[derive(Clone, Default)]
pub struct DeploymentLocks {
    locks: Arc<LockTable>,
}

impl DeploymentLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `deployment_id`.
    pub async fn acquire(&self, deployment_id: &str) -> DeploymentGuard {
        let mutex = self
            .locks
            .entry(deployment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;

        DeploymentGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            key: deployment_id.to_string(),
        }
    }

    /// Number of deployments with a holder or waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no deployment is locked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one deployment. Released on drop.
pub struct DeploymentGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
    key: String,
}

impl DeploymentGuard {
    /// The locked deployment id.
    pub fn deployment_id(&self) -> &str {
        &self.key
    }
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        // Release the mutex before checking whether anyone else still refers to it.
        drop(self.guard.take());
        // Only the table's own Arc left: nobody holds or waits.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
