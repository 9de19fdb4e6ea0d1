//! The outer wire container.

use crate::{AuditMessage, ClientDatabaseRequest, MembershipMessage, PbftMessage};
use borsh::{BorshDeserialize, BorshSerialize};
use quorumkv_types::NodeId;

/// Outer container for everything on the wire: the sender's uuid plus one
/// of the inner payload families.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Envelope {
    pub sender: NodeId,
    pub payload: EnvelopePayload,
}

/// The inner payload families.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum EnvelopePayload {
    Consensus(PbftMessage),
    Membership(MembershipMessage),
    Audit(AuditMessage),
    Database(ClientDatabaseRequest),
}

impl Envelope {
    pub fn new(sender: NodeId, payload: EnvelopePayload) -> Self {
        Self { sender, payload }
    }

    /// Get a human-readable name for the inner payload.
    pub fn payload_name(&self) -> &'static str {
        match &self.payload {
            EnvelopePayload::Consensus(m) => m.type_name(),
            EnvelopePayload::Membership(m) => m.type_name(),
            EnvelopePayload::Audit(m) => m.type_name(),
            EnvelopePayload::Database(_) => "Database",
        }
    }
}
