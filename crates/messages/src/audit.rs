//! Audit notices.
//!
//! Best-effort observability messages broadcast alongside the protocol.
//! They carry no protocol weight; replicas with auditing disabled simply
//! never send them.

use borsh::{BorshDeserialize, BorshSerialize};
use quorumkv_types::{Hash, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AuditMessage {
    /// Periodic heartbeat from the replica that believes it is primary.
    PrimaryStatus { view: u64, primary: NodeId },
    /// An operation reached committed-local at the sender.
    CommitNotice {
        sequence: u64,
        digest: Hash,
        sender: NodeId,
    },
    /// The sender's failure detector gave up on the primary.
    FailureDetected { sender: NodeId },
}

impl AuditMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            AuditMessage::PrimaryStatus { .. } => "PrimaryStatus",
            AuditMessage::CommitNotice { .. } => "CommitNotice",
            AuditMessage::FailureDetected { .. } => "FailureDetected",
        }
    }
}
