//! Replica membership configuration.

use crate::{Hash, PeerAddress};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Process-wide monotone counter for configuration indices.
///
/// Indices order configurations created in this process; cross-replica
/// identity is by content hash, never by index.
static NEXT_INDEX: AtomicU64 = AtomicU64::new(1);

/// Errors from parsing a serialized configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("malformed configuration payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("configuration rejected peer {0}")]
    InvalidPeer(String),
}

/// An immutable-once-shared set of replicas.
///
/// Peers are kept sorted by uuid; the sorted order drives deterministic
/// primary selection (`peers[view % n]`) and the canonical serialization
/// that the content hash is computed over. The hash is the configuration's
/// identity for cross-replica agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ConfigurationRepr", into = "ConfigurationRepr")]
pub struct Configuration {
    index: u64,
    peers: Vec<PeerAddress>,
}

/// Canonical wire/JSON form: just the peer list.
///
/// The index is process-local and never serialized; parsing assigns a
/// fresh one.
#[derive(Serialize, Deserialize)]
struct ConfigurationRepr {
    peers: Vec<PeerAddress>,
}

impl TryFrom<ConfigurationRepr> for Configuration {
    type Error = ConfigurationError;

    fn try_from(repr: ConfigurationRepr) -> Result<Self, Self::Error> {
        let mut config = Configuration::new();
        for peer in repr.peers {
            let label = peer.to_string();
            if !config.add_peer(peer) {
                return Err(ConfigurationError::InvalidPeer(label));
            }
        }
        Ok(config)
    }
}

impl From<Configuration> for ConfigurationRepr {
    fn from(config: Configuration) -> Self {
        ConfigurationRepr { peers: config.peers }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    /// Create an empty configuration under a fresh index.
    pub fn new() -> Self {
        Self {
            index: NEXT_INDEX.fetch_add(1, Ordering::Relaxed),
            peers: Vec::new(),
        }
    }

    /// Build a configuration from a peer list, rejecting invalid entries.
    pub fn from_peers(peers: impl IntoIterator<Item = PeerAddress>) -> Option<Self> {
        let mut config = Self::new();
        for peer in peers {
            if !config.add_peer(peer) {
                return None;
            }
        }
        Some(config)
    }

    /// A new configuration with a fresh index and the same peers.
    ///
    /// Used to construct the proposed "next" configuration during
    /// membership reconfiguration.
    pub fn fork(&self) -> Self {
        Self {
            index: NEXT_INDEX.fetch_add(1, Ordering::Relaxed),
            peers: self.peers.clone(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Peers sorted by uuid.
    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }

    /// Shared snapshot of the sorted peer list, captured by operations for
    /// quorum accounting that must not observe later configurations.
    pub fn peers_snapshot(&self) -> Arc<Vec<PeerAddress>> {
        Arc::new(self.peers.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Content hash over the canonical JSON form of the sorted peer list.
    ///
    /// Equal peer sets hash equal on every replica regardless of insertion
    /// order or local index.
    pub fn hash(&self) -> Hash {
        let canonical =
            serde_json::to_vec(&self.peers).expect("peer list serialization cannot fail");
        Hash::digest(&canonical)
    }

    /// Add a peer, rejecting invalid entries and duplicates.
    ///
    /// A peer is a duplicate if it collides with an existing entry on
    /// uuid, name, host+port, or host+status_port.
    pub fn add_peer(&mut self, peer: PeerAddress) -> bool {
        if peer.uuid.as_str().is_empty()
            || peer.host.is_empty()
            || peer.name.is_empty()
            || peer.port == 0
            || peer.status_port == 0
        {
            debug!(peer = %peer, "rejecting peer with empty fields");
            return false;
        }

        let conflict = self.peers.iter().any(|p| {
            p.uuid == peer.uuid
                || p.name == peer.name
                || (p.host == peer.host && p.port == peer.port)
                || (p.host == peer.host && p.status_port == peer.status_port)
        });
        if conflict {
            debug!(peer = %peer, "rejecting peer that conflicts with an existing entry");
            return false;
        }

        self.peers.push(peer);
        self.peers.sort();
        true
    }

    /// Remove a peer by uuid.
    pub fn remove_peer(&mut self, peer: &PeerAddress) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.uuid != peer.uuid);
        before != self.peers.len()
    }

    pub fn contains(&self, uuid: &crate::NodeId) -> bool {
        self.peers.iter().any(|p| &p.uuid == uuid)
    }

    pub fn get_peer(&self, uuid: &crate::NodeId) -> Option<&PeerAddress> {
        self.peers.iter().find(|p| &p.uuid == uuid)
    }

    /// Serialize to the canonical JSON form (the NEW-CONFIG payload).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("configuration serialization cannot fail")
    }

    /// Parse from the canonical JSON form, under a fresh index.
    pub fn from_json(payload: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u16) -> PeerAddress {
        PeerAddress::new(format!("host{n}"), 8000 + n, 9000 + n, format!("name{n}"), format!("uuid{n}"))
    }

    #[test]
    fn indices_are_monotone() {
        let a = Configuration::new();
        let b = Configuration::new();
        assert!(b.index() > a.index());
    }

    #[test]
    fn peers_are_sorted_by_uuid() {
        let mut config = Configuration::new();
        assert!(config.add_peer(peer(3)));
        assert!(config.add_peer(peer(1)));
        assert!(config.add_peer(peer(2)));
        let uuids: Vec<_> = config.peers().iter().map(|p| p.uuid.as_str().to_string()).collect();
        assert_eq!(uuids, vec!["uuid1", "uuid2", "uuid3"]);
    }

    #[test]
    fn rejects_duplicates_and_collisions() {
        let mut config = Configuration::new();
        assert!(config.add_peer(peer(1)));
        // Same uuid.
        assert!(!config.add_peer(peer(1)));
        // Same name, different uuid.
        let mut same_name = peer(2);
        same_name.name = "name1".into();
        assert!(!config.add_peer(same_name));
        // Same host+port.
        let mut same_endpoint = peer(3);
        same_endpoint.host = "host1".into();
        same_endpoint.port = 8001;
        assert!(!config.add_peer(same_endpoint));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn rejects_empty_fields() {
        let mut config = Configuration::new();
        assert!(!config.add_peer(PeerAddress::new("", 1, 2, "n", "u")));
        assert!(!config.add_peer(PeerAddress::new("h", 0, 2, "n", "u")));
        assert!(!config.add_peer(PeerAddress::new("h", 1, 2, "", "u")));
        assert!(!config.add_peer(PeerAddress::new("h", 1, 2, "n", "")));
    }

    #[test]
    fn remove_peer_by_uuid() {
        let mut config = Configuration::new();
        config.add_peer(peer(1));
        config.add_peer(peer(2));
        assert!(config.remove_peer(&peer(1)));
        assert!(!config.remove_peer(&peer(1)));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn json_round_trip_preserves_peers_and_hash() {
        let mut config = Configuration::new();
        config.add_peer(peer(2));
        config.add_peer(peer(1));

        let parsed = Configuration::from_json(&config.to_json()).unwrap();
        assert_eq!(parsed.peers(), config.peers());
        assert_eq!(parsed.hash(), config.hash());
        // A fresh index is assigned on parse.
        assert!(parsed.index() > config.index());
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let mut a = Configuration::new();
        a.add_peer(peer(1));
        a.add_peer(peer(2));
        let mut b = Configuration::new();
        b.add_peer(peer(2));
        b.add_peer(peer(1));
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn fork_gets_fresh_index_same_peers() {
        let mut config = Configuration::new();
        config.add_peer(peer(1));
        let forked = config.fork();
        assert!(forked.index() > config.index());
        assert_eq!(forked.peers(), config.peers());
        assert_eq!(forked.hash(), config.hash());
    }
}
