//! Outbound message types for network communication.

use quorumkv_messages::{AuditMessage, ClientDatabaseRequest, MembershipMessage, PbftMessage};

/// Outbound network messages.
///
/// These are the messages a replica can send to other replicas.
/// The runner handles the actual network I/O, wrapping each message in an
/// envelope naming this replica as the sender.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Agreement protocol message (PRE-PREPARE through NEW-VIEW).
    Consensus(PbftMessage),

    /// Membership request or state transfer.
    Membership(MembershipMessage),

    /// Best-effort audit notice.
    Audit(AuditMessage),

    /// A client database request forwarded to the primary.
    Database(ClientDatabaseRequest),
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Consensus(m) => m.type_name(),
            OutboundMessage::Membership(m) => m.type_name(),
            OutboundMessage::Audit(m) => m.type_name(),
            OutboundMessage::Database(_) => "Database",
        }
    }

    /// Check if this is an agreement protocol message.
    pub fn is_consensus(&self) -> bool {
        matches!(self, OutboundMessage::Consensus(_))
    }

    /// Check if this is an audit notice.
    pub fn is_audit(&self) -> bool {
        matches!(self, OutboundMessage::Audit(_))
    }
}
