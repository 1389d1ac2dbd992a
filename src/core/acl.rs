//! Client access control
//!
//! A yes/no predicate over client addresses, consulted after accept and
//! before a handler is created. A disabled list admits everyone.

use std::collections::HashSet;
use std::net::IpAddr;

/// Access control list for incoming TCP clients
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    enabled: bool,
    allowed: HashSet<IpAddr>,
}

impl AccessList {
    /// A list that admits every client
    pub fn disabled() -> Self {
        Self::default()
    }

    /// An enabled list admitting only the given addresses
    pub fn new<I>(allowed: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        Self {
            enabled: true,
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Whether filtering is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether a client at `addr` may connect
    pub fn allowed(&self, addr: IpAddr) -> bool {
        !self.enabled || self.allowed.contains(&addr)
    }
}
