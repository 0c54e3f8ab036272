use std::collections::HashSet;
use std::net::TcpListener;

use tracing::debug;

/// A contiguous range of ports owned by one runtime kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPool {
    pub base: u16,
    pub size: u16,
}

impl PortPool {
    pub fn new(base: u16, size: u16) -> Self {
        Self { base, size }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && u32::from(port) < u32::from(self.base) + u32::from(self.size)
    }

    pub fn overlaps(&self, other: &PortPool) -> bool {
        let end = u32::from(self.base) + u32::from(self.size);
        let other_end = u32::from(other.base) + u32::from(other.size);
        u32::from(self.base) < other_end && u32::from(other.base) < end
    }

    fn candidates(&self) -> impl Iterator<Item = u16> {
        let end = (u32::from(self.base) + u32::from(self.size)).min(u32::from(u16::MAX) + 1);
        (u32::from(self.base)..end).map(|p| p as u16)
    }
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Ask the OS for an ephemeral port that is free right now.
pub fn find_free_port() -> Option<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .ok()
}

/// Smallest port in `pool` that is neither in `held` nor rejected by
/// `is_free`, normally a bind probe on this host.
pub(crate) fn first_free_port_with(
    pool: &PortPool,
    held: &HashSet<u16>,
    is_free: impl Fn(u16) -> bool,
) -> Option<u16> {
    pool.candidates().filter(|p| !held.contains(p)).find(|&port| {
        if is_free(port) {
            return true;
        }
        match identify_port_owner(port) {
            Some(owner) => debug!(port, owner = %owner, "pool port occupied by foreign process"),
            None => debug!(port, "pool port occupied"),
        }
        false
    })
}

/// Identify which process owns a given port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    crate::platform::identify_port_owner(port)
}
