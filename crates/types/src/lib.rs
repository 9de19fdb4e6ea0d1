//! Core types for quorumkv replication.
//!
//! This crate provides the foundational types used throughout the
//! replication engine:
//!
//! - **Primitives**: [`Hash`], [`NodeId`]
//! - **Membership**: [`PeerAddress`], [`Configuration`]
//! - **Client payloads**: [`Request`], [`DatabaseMsg`], [`DatabaseResponse`]
//! - **Checkpoints**: [`Checkpoint`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod configuration;
mod hash;
mod peer;
mod request;

pub use configuration::{Configuration, ConfigurationError};
pub use hash::{Hash, HexError};
pub use peer::{NodeId, PeerAddress};
pub use request::{
    DatabaseHeader, DatabaseMsg, DatabaseOperation, DatabaseResponse, ErrorToken, Request,
    RequestKind, ResponsePayload,
};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A checkpoint of the service state: the sequence number at which it was
/// taken and the hash of the state at that point.
///
/// Checkpoints are taken every `checkpoint_interval` executed operations
/// and become *stable* once a quorum of replicas vouch for the same
/// (sequence, state hash) pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Checkpoint {
    /// Sequence number the checkpoint covers (everything ≤ this executed).
    pub sequence: u64,
    /// Hash of the service state after executing `sequence`.
    pub state_hash: Hash,
}

impl Checkpoint {
    /// The initial checkpoint every replica starts from: nothing executed,
    /// state hash of the empty service state.
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            state_hash: Hash::digest(b"<null db state>"),
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checkpoint(seq={}, state={})", self.sequence, self.state_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_checkpoint_is_stable_across_replicas() {
        assert_eq!(Checkpoint::genesis(), Checkpoint::genesis());
        assert_eq!(Checkpoint::genesis().sequence, 0);
    }

    #[test]
    fn checkpoint_ordering_is_by_sequence_first() {
        let a = Checkpoint { sequence: 100, state_hash: Hash::digest(b"a") };
        let b = Checkpoint { sequence: 200, state_hash: Hash::digest(b"b") };
        assert!(a < b);
    }
}
