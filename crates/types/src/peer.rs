//! Replica identity and addressing.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Unique replica identifier.
///
/// Free-form uuid string assigned out of band; the sole basis for peer
/// equality, hashing, and the deterministic ordering used for primary
/// selection.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(uuid: impl Into<String>) -> Self {
        NodeId(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Network address and identity of one replica.
///
/// `port` carries replication traffic; `status_port` serves the status
/// surface. Equality, hashing, and ordering are by `uuid` alone; two
/// records with the same uuid are the same peer regardless of address.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
    pub status_port: u16,
    pub name: String,
    pub uuid: NodeId,
}

impl PeerAddress {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        status_port: u16,
        name: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            status_port,
            name: name.into(),
            uuid: NodeId::new(uuid),
        }
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for PeerAddress {}

impl std::hash::Hash for PeerAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl PartialOrd for PeerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.uuid, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_uuid_only() {
        let a = PeerAddress::new("host-a", 8080, 8081, "alpha", "uuid-1");
        let b = PeerAddress::new("host-b", 9090, 9091, "beta", "uuid-1");
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_by_uuid() {
        let a = PeerAddress::new("z", 1, 2, "z", "uuid-a");
        let b = PeerAddress::new("a", 1, 2, "a", "uuid-b");
        assert!(a < b);
    }
}
