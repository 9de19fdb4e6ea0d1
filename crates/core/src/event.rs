//! Event types for the deterministic state machine.

use crate::SessionId;
use quorumkv_messages::{ClientDatabaseRequest, MembershipMessage, PbftMessage};
use quorumkv_types::{Hash, NodeId};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other replicas.
    Network = 2,

    /// Client events: external inputs from users.
    Client = 3,
}

/// All possible events a replica can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Audit heartbeat fired: the primary announces itself.
    AuditTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// An agreement protocol message arrived from a peer (or from
    /// ourselves; broadcasts include the sender).
    ConsensusMessage { from: NodeId, message: PbftMessage },

    /// A membership or state-transfer message arrived. GET-STATE carries
    /// the session to answer on.
    MembershipMessage {
        from: NodeId,
        session: Option<SessionId>,
        message: MembershipMessage,
    },

    /// The external failure detector gave up on the primary.
    PrimarySuspected,

    // ═══════════════════════════════════════════════════════════════════════
    // Client Messages (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// A wrapped client database request arrived on a session.
    ClientRequest {
        session: Option<SessionId>,
        request: ClientDatabaseRequest,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal Events (priority: Internal)
    // ═══════════════════════════════════════════════════════════════════════
    /// The service finished executing the operation at `sequence`.
    ///
    /// Delivered by the runner after an `ApplyOperation` action; arrives in
    /// strict sequence order because the service executes sequentially.
    OperationExecuted { sequence: u64, digest: Hash },
}

impl Event {
    /// The scheduling priority of this event.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::AuditTimer => EventPriority::Timer,
            Event::ConsensusMessage { .. }
            | Event::MembershipMessage { .. }
            | Event::PrimarySuspected => EventPriority::Network,
            Event::ClientRequest { .. } => EventPriority::Client,
            Event::OperationExecuted { .. } => EventPriority::Internal,
        }
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::AuditTimer => "AuditTimer",
            Event::ConsensusMessage { .. } => "ConsensusMessage",
            Event::MembershipMessage { .. } => "MembershipMessage",
            Event::PrimarySuspected => "PrimarySuspected",
            Event::ClientRequest { .. } => "ClientRequest",
            Event::OperationExecuted { .. } => "OperationExecuted",
        }
    }
}
