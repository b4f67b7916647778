// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback address allocation.
//!
//! Every deployment listens on the same host port; deployments are told apart
//! by the loopback address that port is bound on. The allocator walks a
//! contiguous block of addresses, skips the ones reserved by other
//! deployments in this process, and probes the rest with a real bind.
//!
//! The reservation table closes the probe-to-bind gap between rollouts in one
//! process. Other processes on the host can still win the race, in which case
//! the container engine fails the bind and the rollout fails with
//! `ContainerStartFailed`.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A contiguous range of IPv4 addresses sharing the first three octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    prefix: [u8; 3],
    start: u8,
    end: u8,
}

impl AddressRange {
    /// Create a range. Returns `None` when `start > end`.
    pub fn new(prefix: [u8; 3], start: u8, end: u8) -> Option<Self> {
        (start <= end).then_some(Self { prefix, start, end })
    }

    /// Parse a dotted three-octet prefix (`127.0.0`) and an inclusive
    /// last-octet range (`100-255`).
    pub fn parse(prefix: &str, range: &str) -> Option<Self> {
        let octets: Vec<u8> = prefix
            .split('.')
            .map(|o| o.trim().parse::<u8>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        let prefix: [u8; 3] = octets.try_into().ok()?;

        let (start, end) = range.split_once('-')?;
        Self::new(prefix, start.trim().parse().ok()?, end.trim().parse().ok()?)
    }

    /// First candidate address.
    pub fn first(&self) -> Ipv4Addr {
        self.addr(self.start)
    }

    /// Last candidate address.
    pub fn last(&self) -> Ipv4Addr {
        self.addr(self.end)
    }

    /// Number of candidate addresses.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Always false; a range holds at least one address.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Candidates in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (self.start..=self.end).map(|last| self.addr(last))
    }

    fn addr(&self, last: u8) -> Ipv4Addr {
        Ipv4Addr::new(self.prefix[0], self.prefix[1], self.prefix[2], last)
    }
}

impl Default for AddressRange {
    fn default() -> Self {
        Self {
            prefix: [127, 0, 0],
            start: 100,
            end: 255,
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first(), self.end)
    }
}

/// Checks whether a port can be bound on an address.
pub trait PortProbe: Send + Sync {
    /// Returns true if `addr:port` is currently free.
    fn is_free(&self, addr: Ipv4Addr, port: u16) -> bool;
}

/// Probes by binding a TCP listener and dropping it immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_free(&self, addr: Ipv4Addr, port: u16) -> bool {
        match TcpListener::bind(SocketAddrV4::new(addr, port)) {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                debug!(address = %addr, port, error = %e, "Address probe failed");
                false
            }
        }
    }
}

/// Hands out addresses for new containers.
pub trait AddressAllocator: Send + Sync {
    /// Reserve a free address for `owner` on `port`.
    ///
    /// An address already reserved by `owner` is returned again if it is still
    /// bindable. Fails with [`Error::NoAddressAvailable`] when the range is
    /// exhausted.
    fn allocate(&self, owner: &str, port: u16) -> Result<Ipv4Addr>;

    /// Drop every reservation held by `owner`.
    fn release(&self, owner: &str);
}

/// Allocator over a loopback [`AddressRange`] with an in-process reservation table.
pub struct LoopbackAllocator {
    range: AddressRange,
    probe: Arc<dyn PortProbe>,
    reservations: Mutex<HashMap<Ipv4Addr, String>>,
}

impl LoopbackAllocator {
    /// Create an allocator that probes with real TCP binds.
    pub fn new(range: AddressRange) -> Self {
        Self::with_probe(range, Arc::new(TcpPortProbe))
    }

    /// Create an allocator with a custom probe.
    pub fn with_probe(range: AddressRange, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            probe,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Address currently reserved by `owner`, if any.
    pub fn reserved_by(&self, owner: &str) -> Option<Ipv4Addr> {
        self.table()
            .iter()
            .find(|(_, o)| o.as_str() == owner)
            .map(|(addr, _)| *addr)
    }

    /// Number of live reservations.
    pub fn reservation_count(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<Ipv4Addr, String>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.reservations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AddressAllocator for LoopbackAllocator {
    fn allocate(&self, owner: &str, port: u16) -> Result<Ipv4Addr> {
        let mut table = self.table();

        for addr in self.range.iter() {
            if let Some(holder) = table.get(&addr) {
                if holder != owner {
                    continue;
                }
            }
            if self.probe.is_free(addr, port) {
                // An owner holds at most one address at a time.
                table.retain(|_, o| o != owner);
                table.insert(addr, owner.to_string());
                debug!(owner = %owner, address = %addr, port, "Address reserved");
                return Ok(addr);
            }
        }

        warn!(owner = %owner, range = %self.range, port, "Address range exhausted");
        Err(Error::NoAddressAvailable {
            range: self.range.to_string(),
            port,
        })
    }

    fn release(&self, owner: &str) {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, o| o != owner);
        if table.len() != before {
            debug!(owner = %owner, "Address reservation released");
        }
    }
}
