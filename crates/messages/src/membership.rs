//! Membership and state-transfer messages.

use borsh::{BorshDeserialize, BorshSerialize};
use quorumkv_types::{Hash, PeerAddress};

/// Membership requests and checkpoint state transfer.
///
/// JOIN/LEAVE are client-facing requests handled by the primary, which
/// converts them into NEW-CONFIG requests ordered through the log.
/// GET-STATE/SET-STATE move checkpoint snapshots between replicas.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum MembershipMessage {
    /// Ask the swarm to add this peer.
    Join(PeerAddress),
    /// Ask the swarm to remove this peer.
    Leave(PeerAddress),
    /// Request the service snapshot backing a stable checkpoint.
    GetState { sequence: u64, state_hash: Hash },
    /// The snapshot backing a checkpoint, answering GET-STATE.
    SetState {
        sequence: u64,
        state_hash: Hash,
        snapshot: Vec<u8>,
    },
}

impl MembershipMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            MembershipMessage::Join(_) => "Join",
            MembershipMessage::Leave(_) => "Leave",
            MembershipMessage::GetState { .. } => "GetState",
            MembershipMessage::SetState { .. } => "SetState",
        }
    }
}
