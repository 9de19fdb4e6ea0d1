//! Action types for the deterministic state machine.

use crate::{Event, OutboundMessage, SessionId, TimerId};
use quorumkv_types::{DatabaseResponse, Hash, NodeId, Request};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to every peer in the current configuration,
    /// **including this replica**; self-delivery counts toward quorum.
    Broadcast { message: OutboundMessage },

    /// Send a message to a single peer (forward-to-primary, GET-STATE,
    /// and the SET-STATE reply).
    SendTo { peer: NodeId, message: OutboundMessage },

    /// Deliver a response to a client session. The session is a weak
    /// handle: if the client is gone the runner drops the response with a
    /// warning.
    RespondToClient {
        session: SessionId,
        response: DatabaseResponse,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer. The runner logs the cancellation and
    /// the timer never fires.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    ///
    /// Internal events are processed at the same timestamp with higher
    /// priority than external events, preserving causality.
    EnqueueInternal { event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated Work (returns callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Hand a committed operation to the service for execution.
    ///
    /// The service executes strictly in sequence order, buffering gaps;
    /// each operation actually executed comes back as
    /// `Event::OperationExecuted`. The runner pairs the session (when
    /// present) with the service's response for client delivery.
    ApplyOperation {
        sequence: u64,
        digest: Hash,
        request: Request,
        session: Option<SessionId>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // External Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Tell the external failure detector that the request with this
    /// digest has been executed.
    NotifyExecuted { digest: Hash },
}

impl Action {
    /// Check if this action sends something over the network.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Action::Broadcast { .. } | Action::SendTo { .. } | Action::RespondToClient { .. }
        )
    }

    /// Check if this is an internal event action.
    pub fn is_internal(&self) -> bool {
        matches!(self, Action::EnqueueInternal { .. })
    }

    /// Check if this action is delegated work (returns a callback event).
    pub fn is_delegated(&self) -> bool {
        matches!(self, Action::ApplyOperation { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SendTo { .. } => "SendTo",
            Action::RespondToClient { .. } => "RespondToClient",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::ApplyOperation { .. } => "ApplyOperation",
            Action::NotifyExecuted { .. } => "NotifyExecuted",
        }
    }
}
