use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A controller instance reachable by clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub address: String,
    pub port: u16,
}

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Cluster membership as seen by the control plane.
pub trait HostDiscovery: Send + Sync {
    fn hosts(&self) -> Result<Vec<Host>>;

    fn register(&self, host: Host) -> Result<()>;

    fn deregister(&self, host: &Host) -> Result<()>;
}

/// Fixed host list held in memory.
#[derive(Debug, Default)]
pub struct StaticHostDiscovery {
    hosts: RwLock<BTreeSet<Host>>,
}

impl StaticHostDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: impl IntoIterator<Item = Host>) -> Self {
        Self {
            hosts: RwLock::new(hosts.into_iter().collect()),
        }
    }
}

impl HostDiscovery for StaticHostDiscovery {
    fn hosts(&self) -> Result<Vec<Host>> {
        Ok(self.hosts.read().iter().cloned().collect())
    }

    fn register(&self, host: Host) -> Result<()> {
        self.hosts.write().insert(host);
        Ok(())
    }

    fn deregister(&self, host: &Host) -> Result<()> {
        self.hosts.write().remove(host);
        Ok(())
    }
}
