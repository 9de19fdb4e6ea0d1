//! Node state machine.

use crate::StatusReport;
use quorumkv_core::{Action, Event, StateMachine, SubStateMachine};
use quorumkv_pbft::{PbftConfig, RecoveredState, ReplicaState, Service};
use quorumkv_types::{Configuration, NodeId};
use std::sync::Arc;
use std::time::Duration;

/// Combined node state machine.
///
/// Wraps the replica behind the [`StateMachine`] trait the runners drive,
/// and exposes the status surface. Today the replica is the only
/// component; the composition point exists so the runner never has to
/// know the replica's internals.
pub struct NodeStateMachine {
    /// The replication engine.
    replica: ReplicaState,

    /// Current time.
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("replica", &self.replica)
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Create a node state machine.
    ///
    /// # Arguments
    ///
    /// * `uuid` - This replica's identity
    /// * `bootstrap` - The initial membership configuration
    /// * `service` - The application service executing ordered operations
    /// * `config` - Replication tunables
    /// * `recovered` - State recovered from storage. Use
    ///   `RecoveredState::default()` for a fresh start.
    pub fn new(
        uuid: NodeId,
        bootstrap: Configuration,
        service: Arc<dyn Service>,
        config: PbftConfig,
        recovered: RecoveredState,
    ) -> Self {
        Self {
            replica: ReplicaState::new(uuid, bootstrap, service, config, recovered),
            now: Duration::ZERO,
        }
    }

    /// Actions to perform at startup (initial timers).
    pub fn start(&mut self) -> Vec<Action> {
        self.replica.start()
    }

    /// Get this node's uuid.
    pub fn uuid(&self) -> &NodeId {
        self.replica.uuid()
    }

    /// Get a reference to the replica state.
    pub fn replica(&self) -> &ReplicaState {
        &self.replica
    }

    /// Get a mutable reference to the replica state.
    pub fn replica_mut(&mut self) -> &mut ReplicaState {
        &mut self.replica
    }

    /// Build the status surface snapshot.
    pub fn status(&self) -> StatusReport {
        StatusReport::from_replica(&self.replica)
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        self.replica.handle(event)
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.replica.set_time(now);
    }
}
