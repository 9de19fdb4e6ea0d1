//! The replica state machine.
//!
//! This module implements the PBFT replica as a synchronous, event-driven
//! model: the runner delivers one event at a time and executes the
//! returned actions.

use crate::{
    CheckpointManager, ConfigStore, OperationKey, OperationLog, PbftConfig, RecentRequests,
    Service, ViewChangeState,
};
use quorumkv_core::{Action, Event, OutboundMessage, SessionId, SubStateMachine, TimerId};
use quorumkv_messages::{
    AuditMessage, CheckpointMsg, ClientDatabaseRequest, Commit, MembershipMessage, NewView,
    PbftMessage, PeerCheckpoint, PrePrepare, Prepare, PreparedProof, ViewChange,
};
use quorumkv_types::{
    Checkpoint, Configuration, DatabaseHeader, DatabaseResponse, ErrorToken, Hash, NodeId,
    PeerAddress, Request, RequestKind,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State recovered from storage on startup.
///
/// The persistence contract covers the stable checkpoint, its proof set,
/// and the current configuration; everything else is reconstructible from
/// peers via state transfer. Use `RecoveredState::default()` for a fresh
/// start.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// The persisted stable checkpoint, if any.
    pub stable_checkpoint: Option<Checkpoint>,
    /// The quorum of checkpoint messages proving it.
    pub stable_proof: Vec<PeerCheckpoint>,
    /// The persisted current configuration, overriding the bootstrap one.
    pub configuration: Option<Configuration>,
}

/// The PBFT replica.
///
/// Handles request admission, the three-phase agreement protocol,
/// checkpointing with state transfer, view changes, and membership
/// reconfiguration.
///
/// # State Machine Flow
///
/// 1. **Client request** → primary admits and broadcasts PRE-PREPARE;
///    backups forward to the primary
/// 2. **PRE-PREPARE received** → accept unless conflicting, broadcast PREPARE
/// 3. **PREPARE quorum** → enter commit phase, broadcast COMMIT
/// 4. **COMMIT quorum** → committed-local, hand to the service in order
/// 5. **Every checkpoint interval** → broadcast CHECKPOINT; a quorum of
///    matching checkpoints trims the log and advances the window
/// 6. **Failure detector / f+1 peer votes** → view change to the next view
pub struct ReplicaState {
    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════
    /// This replica's uuid.
    uuid: NodeId,

    /// The application service executing ordered operations.
    service: Arc<dyn Service>,

    /// Tunables.
    config: PbftConfig,

    // ═══════════════════════════════════════════════════════════════════════
    // View State
    // ═══════════════════════════════════════════════════════════════════════
    /// Current view. Starts at 1 and only ever increases.
    view: u64,

    /// False while a view change is in progress; most messages are
    /// dropped until a NEW-VIEW restores validity.
    view_is_valid: bool,

    /// Next sequence this replica will assign when primary.
    next_issued_sequence: u64,

    // ═══════════════════════════════════════════════════════════════════════
    // Protocol State
    // ═══════════════════════════════════════════════════════════════════════
    /// Live agreement instances and the accepted pre-prepare table.
    log: OperationLog,

    /// Checkpoints, proofs, and the sequence window.
    checkpoints: CheckpointManager,

    /// Known membership configurations.
    configurations: ConfigStore,

    /// Duplicate request suppression.
    recent_requests: RecentRequests,

    /// View-change collection for the next view.
    view_change: ViewChangeState,

    // ═══════════════════════════════════════════════════════════════════════
    // Audit
    // ═══════════════════════════════════════════════════════════════════════
    audit_enabled: bool,

    // ═══════════════════════════════════════════════════════════════════════
    // Misc
    // ═══════════════════════════════════════════════════════════════════════
    /// Peer picker for state transfer. Uniform; not security relevant.
    rng: ChaCha8Rng,

    /// Current time (set by the runner before each handle call).
    now: Duration,
}

impl std::fmt::Debug for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaState")
            .field("uuid", &self.uuid)
            .field("view", &self.view)
            .field("view_is_valid", &self.view_is_valid)
            .field("next_issued_sequence", &self.next_issued_sequence)
            .field("stable_checkpoint", &self.checkpoints.stable().sequence)
            .field("operations", &self.log.len())
            .finish()
    }
}

impl ReplicaState {
    /// Create a replica from a bootstrap configuration.
    ///
    /// Panics if the effective configuration has no peers: a replica
    /// without a swarm cannot make progress and the deployment is
    /// misconfigured.
    pub fn new(
        uuid: NodeId,
        bootstrap: Configuration,
        service: Arc<dyn Service>,
        config: PbftConfig,
        recovered: RecoveredState,
    ) -> Self {
        let initial = recovered.configuration.unwrap_or(bootstrap);
        assert!(!initial.is_empty(), "no peers in initial configuration");

        let mut configurations = ConfigStore::new();
        let hash = initial.hash();
        configurations.add(Arc::new(initial));
        configurations.enable(&hash, true);
        configurations.set_current(&hash);

        let stable = recovered.stable_checkpoint.unwrap_or_else(Checkpoint::genesis);
        let checkpoints =
            CheckpointManager::new(stable, recovered.stable_proof, config.high_water_span());

        let rng = match config.state_transfer_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let audit_enabled = config.audit_enabled;
        Self {
            uuid,
            service,
            config,
            view: 1,
            view_is_valid: true,
            next_issued_sequence: stable.sequence + 1,
            log: OperationLog::new(),
            checkpoints,
            configurations,
            recent_requests: RecentRequests::new(),
            view_change: ViewChangeState::new(),
            audit_enabled,
            rng,
            now: Duration::ZERO,
        }
    }

    /// Actions to perform at startup (the first heartbeat timer).
    pub fn start(&mut self) -> Vec<Action> {
        vec![Action::SetTimer {
            id: TimerId::AuditHeartbeat,
            duration: self.config.heartbeat_interval,
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn uuid(&self) -> &NodeId {
        &self.uuid
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn is_view_valid(&self) -> bool {
        self.view_is_valid
    }

    pub fn next_issued_sequence(&self) -> u64 {
        self.next_issued_sequence
    }

    pub fn outstanding_operations_count(&self) -> usize {
        self.log.len()
    }

    pub fn latest_stable_checkpoint(&self) -> Checkpoint {
        self.checkpoints.stable()
    }

    pub fn latest_checkpoint(&self) -> Checkpoint {
        self.checkpoints.latest()
    }

    pub fn unstable_checkpoints_count(&self) -> usize {
        self.checkpoints.unstable_count()
    }

    pub fn low_water_mark(&self) -> u64 {
        self.checkpoints.low_water_mark()
    }

    pub fn high_water_mark(&self) -> u64 {
        self.checkpoints.high_water_mark()
    }

    pub fn set_audit_enabled(&mut self, enabled: bool) {
        self.audit_enabled = enabled;
    }

    /// The current configuration. Panics if the store has lost its current
    /// entry, which the reconfiguration protocol never allows.
    fn current_config(&self) -> Arc<Configuration> {
        self.configurations.current().expect("no current configuration")
    }

    pub fn current_peers(&self) -> Vec<PeerAddress> {
        self.current_config().peers().to_vec()
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.configurations
    }

    /// The primary of the current view: `peers_sorted[view mod n]`.
    pub fn primary(&self) -> PeerAddress {
        let config = self.current_config();
        let peers = config.peers();
        peers[(self.view as usize) % peers.len()].clone()
    }

    pub fn is_primary(&self) -> bool {
        self.primary().uuid == self.uuid
    }

    /// The primary of `view` under the current configuration.
    fn primary_of(&self, view: u64) -> PeerAddress {
        let config = self.current_config();
        let peers = config.peers();
        peers[(view as usize) % peers.len()].clone()
    }

    /// f = ⌊(n-1)/3⌋ under the current configuration.
    pub fn max_faulty(&self) -> usize {
        self.current_config().len().saturating_sub(1) / 3
    }

    /// 2f+1 under the current configuration.
    pub fn quorum_size(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    fn now_ms(&self) -> u64 {
        self.now.as_millis() as u64
    }

    fn peers_snapshot(&self) -> Arc<Vec<PeerAddress>> {
        self.current_config().peers_snapshot()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client Requests
    // ═══════════════════════════════════════════════════════════════════════

    fn on_client_request(
        &mut self,
        session: Option<SessionId>,
        wrapped: ClientDatabaseRequest,
    ) -> Vec<Action> {
        let msg = match wrapped.unwrap_msg() {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "failed to decode client database request");
                return match session {
                    Some(session) => vec![Action::RespondToClient {
                        session,
                        response: DatabaseResponse::error(
                            DatabaseHeader::default(),
                            ErrorToken::InvalidCrud,
                        ),
                    }],
                    None => vec![],
                };
            }
        };

        let header = msg.header.clone();

        // No ordering while the primacy is being contested.
        if !self.view_is_valid {
            return match session {
                Some(session) => vec![Action::RespondToClient {
                    session,
                    response: DatabaseResponse::error(header, ErrorToken::ElectionInProgress),
                }],
                None => vec![],
            };
        }

        let mut actions = if self.is_primary() {
            let request = Request::database(wrapped.client.clone(), wrapped.timestamp, msg);
            self.admit_request(request, session)
        } else {
            info!(primary = %self.primary().uuid, "forwarding request to primary");
            vec![Action::SendTo {
                peer: self.primary().uuid,
                message: OutboundMessage::Database(wrapped),
            }]
        };

        // The admission ack; ordering happens asynchronously.
        if let Some(session) = session {
            actions.push(Action::RespondToClient {
                session,
                response: DatabaseResponse::ok(header, quorumkv_types::ResponsePayload::Ack),
            });
        }
        actions
    }

    /// Primary-side request admission: age window, duplicate suppression,
    /// sequence assignment, PRE-PREPARE broadcast.
    fn admit_request(&mut self, request: Request, session: Option<SessionId>) -> Vec<Action> {
        let now = self.now_ms();
        let age = self.config.max_request_age_ms();
        if request.timestamp < now.saturating_sub(age) || request.timestamp > now + age {
            info!(
                timestamp = request.timestamp,
                now, "rejecting request outside allowable timestamp range"
            );
            return vec![];
        }

        let digest = request.digest();
        if self.recent_requests.contains(request.timestamp, &request.client, digest) {
            info!(client = %request.client, %digest, "rejecting duplicate request");
            return vec![];
        }
        self.recent_requests.record(request.timestamp, &request.client, digest);

        self.broadcast_preprepare(request, digest, session)
    }

    /// Assign the next sequence, set up the operation, and broadcast the
    /// PRE-PREPARE carrying the full request.
    fn broadcast_preprepare(
        &mut self,
        request: Request,
        digest: Hash,
        session: Option<SessionId>,
    ) -> Vec<Action> {
        let sequence = self.next_issued_sequence;
        self.next_issued_sequence += 1;

        let peers = self.peers_snapshot();
        let op = self.log.find_or_create(self.view, sequence, digest, peers);
        op.record_request(request.clone());
        if let Some(session) = session {
            op.set_session(session);
        }

        debug!(view = self.view, sequence, %digest, "issuing preprepare");
        vec![Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::PrePrepare(PrePrepare {
                view: self.view,
                sequence,
                digest,
                request: Some(request),
            })),
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Three-Phase Protocol
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop messages that cannot be considered at all in the current
    /// state: anything but CHECKPOINT/VIEW-CHANGE/NEW-VIEW while the view
    /// is invalid, and three-phase messages for the wrong view or outside
    /// the sequence window.
    fn preliminary_filter(&self, message: &PbftMessage) -> bool {
        if !self.view_is_valid && !message.allowed_during_view_change() {
            debug!(kind = message.type_name(), "dropping message because local view is invalid");
            return false;
        }

        if message.is_three_phase() {
            if message.view() != Some(self.view) {
                debug!(kind = message.type_name(), "dropping message with the wrong view number");
                return false;
            }
            let sequence = message.sequence().unwrap_or(0);
            if !self.checkpoints.in_window(sequence) {
                debug!(sequence, "dropping message with an unreasonable sequence number");
                return false;
            }
        }

        true
    }

    fn on_consensus_message(&mut self, from: NodeId, message: PbftMessage) -> Vec<Action> {
        if !self.preliminary_filter(&message) {
            return vec![];
        }

        match message {
            PbftMessage::PrePrepare(preprepare) => self.handle_preprepare(preprepare),
            PbftMessage::Prepare(prepare) => self.handle_prepare(from, prepare),
            PbftMessage::Commit(commit) => self.handle_commit(from, commit),
            PbftMessage::Checkpoint(checkpoint) => self.handle_checkpoint(from, checkpoint),
            PbftMessage::ViewChange(view_change) => self.handle_viewchange(from, view_change),
            PbftMessage::NewView(new_view) => self.handle_newview(new_view),
        }
    }

    fn handle_preprepare(&mut self, preprepare: PrePrepare) -> Vec<Action> {
        // If we've already accepted a pre-prepare for this (view, sequence)
        // and it's not this one, reject. The same pre-prepare again is fine.
        if self
            .log
            .conflicts_with_accepted(preprepare.view, preprepare.sequence, preprepare.digest)
        {
            debug!(
                view = preprepare.view,
                sequence = preprepare.sequence,
                "rejecting preprepare conflicting with an accepted one"
            );
            return vec![];
        }

        let key: OperationKey = (preprepare.view, preprepare.sequence, preprepare.digest);
        let reply = Prepare {
            view: preprepare.view,
            sequence: preprepare.sequence,
            digest: preprepare.digest,
            request: None,
        };

        let peers = self.peers_snapshot();
        let is_new_config = {
            let op = self.log.find_or_create(key.0, key.1, key.2, peers);
            op.record_preprepare(preprepare);
            op.request().is_some_and(Request::is_new_config)
        };
        self.log.accept_preprepare(key);

        if is_new_config {
            self.store_proposed_configuration(&key);
        }

        debug!(view = key.0, sequence = key.1, "accepted preprepare; broadcasting prepare");
        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::Prepare(reply)),
        }];
        actions.extend(self.maybe_advance(key));
        actions
    }

    fn handle_prepare(&mut self, from: NodeId, prepare: Prepare) -> Vec<Action> {
        let key: OperationKey = (prepare.view, prepare.sequence, prepare.digest);
        let peers = self.peers_snapshot();
        self.log.find_or_create(key.0, key.1, key.2, peers).record_prepare(from, prepare);
        self.maybe_advance(key)
    }

    fn handle_commit(&mut self, from: NodeId, commit: Commit) -> Vec<Action> {
        let key: OperationKey = (commit.view, commit.sequence, commit.digest);
        let peers = self.peers_snapshot();
        self.log.find_or_create(key.0, key.1, key.2, peers).record_commit(from, commit.request);
        self.maybe_advance(key)
    }

    /// Move an operation forward through any phase transitions its
    /// accumulated evidence now justifies.
    fn maybe_advance(&mut self, key: OperationKey) -> Vec<Action> {
        let mut actions = Vec::new();

        let ready_for_commit = self.log.get(&key).is_some_and(|op| {
            op.phase() == crate::OperationPhase::Prepare && op.is_prepared()
        });
        if ready_for_commit {
            actions.extend(self.do_prepared(key));
        }

        let ready_for_committed = self.log.get(&key).is_some_and(|op| {
            op.phase() == crate::OperationPhase::Commit && op.is_committed()
        });
        if ready_for_committed {
            actions.extend(self.do_committed(key));
        }

        actions
    }

    fn do_prepared(&mut self, key: OperationKey) -> Vec<Action> {
        // A prepared NEW-CONFIG becomes acceptable under view changes.
        if let Some(payload) = self.new_config_payload(&key) {
            self.enable_proposed_configuration(&payload);
        }

        debug!(view = key.0, sequence = key.1, "entering commit phase");
        let op = self.log.get_mut(&key).expect("operation exists");
        op.begin_commit_phase();

        vec![Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::Commit(Commit {
                view: key.0,
                sequence: key.1,
                digest: key.2,
                request: None,
            })),
        }]
    }

    fn do_committed(&mut self, key: OperationKey) -> Vec<Action> {
        // A committed NEW-CONFIG becomes current; earlier configurations
        // are purged.
        if let Some(payload) = self.new_config_payload(&key) {
            self.adopt_committed_configuration(&payload);
        }

        debug!(view = key.0, sequence = key.1, "operation is committed-local");
        let (request, session) = {
            let op = self.log.get_mut(&key).expect("operation exists");
            op.end_commit_phase();
            (op.request().cloned().expect("committed implies request"), op.session())
        };

        let mut actions = Vec::new();
        if self.audit_enabled {
            actions.push(Action::Broadcast {
                message: OutboundMessage::Audit(AuditMessage::CommitNotice {
                    sequence: key.1,
                    digest: key.2,
                    sender: self.uuid.clone(),
                }),
            });
        }

        if request.is_database() {
            actions.push(Action::ApplyOperation {
                sequence: key.1,
                digest: key.2,
                request,
                session,
            });
        } else {
            // The service needs contiguous sequences; fill this slot with
            // a synthesized NULL request.
            let null = Request::null();
            actions.push(Action::ApplyOperation {
                sequence: key.1,
                digest: null.digest(),
                request: null,
                session: None,
            });
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration Handling
    // ═══════════════════════════════════════════════════════════════════════

    fn new_config_payload(&self, key: &OperationKey) -> Option<String> {
        self.log.get(key).and_then(|op| match op.request().map(|r| &r.kind) {
            Some(RequestKind::NewConfig(payload)) => Some(payload.clone()),
            _ => None,
        })
    }

    /// PRE-PREPARE of a NEW-CONFIG: parse and store the proposed
    /// configuration, not yet enabled.
    fn store_proposed_configuration(&mut self, key: &OperationKey) {
        let Some(payload) = self.new_config_payload(key) else { return };
        match Configuration::from_json(&payload) {
            Ok(config) => {
                let hash = config.hash();
                if self.configurations.get(&hash).is_none() {
                    info!(%hash, peers = config.len(), "storing proposed configuration");
                    self.configurations.add(Arc::new(config));
                }
            }
            Err(err) => warn!(%err, "ignoring unparseable proposed configuration"),
        }
    }

    /// Prepared NEW-CONFIG: mark the configuration enabled.
    fn enable_proposed_configuration(&mut self, payload: &str) {
        match Configuration::from_json(payload) {
            Ok(config) => {
                let hash = config.hash();
                if self.configurations.get(&hash).is_none() {
                    self.configurations.add(Arc::new(config));
                }
                self.configurations.enable(&hash, true);
                info!(%hash, "enabled prepared configuration");
            }
            Err(err) => warn!(%err, "cannot enable unparseable configuration"),
        }
    }

    /// Committed NEW-CONFIG: make it current and purge earlier entries.
    fn adopt_committed_configuration(&mut self, payload: &str) {
        let Ok(config) = Configuration::from_json(payload) else {
            warn!("cannot adopt unparseable configuration");
            return;
        };
        let hash = config.hash();
        if !self.configurations.is_enabled(&hash) {
            warn!(%hash, "committed configuration was never enabled; refusing to adopt");
            return;
        }
        self.configurations.set_current(&hash);
        if let Some(stored) = self.configurations.get(&hash) {
            self.configurations.remove_prior_to(stored.index());
        }
        info!(%hash, "moved to new configuration");
    }

    fn on_membership_message(
        &mut self,
        from: NodeId,
        _session: Option<SessionId>,
        message: MembershipMessage,
    ) -> Vec<Action> {
        match message {
            MembershipMessage::Join(peer) => self.handle_join_or_leave(peer, true),
            MembershipMessage::Leave(peer) => self.handle_join_or_leave(peer, false),
            MembershipMessage::GetState { sequence, state_hash } => {
                self.handle_get_state(from, sequence, state_hash)
            }
            MembershipMessage::SetState { sequence, state_hash, snapshot } => {
                self.handle_set_state(sequence, state_hash, snapshot)
            }
        }
    }

    /// Convert a JOIN/LEAVE into an internally generated NEW-CONFIG
    /// request and order it through normal agreement.
    fn handle_join_or_leave(&mut self, peer: PeerAddress, join: bool) -> Vec<Action> {
        if !self.is_primary() {
            error!("ignoring membership request because I am not the primary");
            return vec![];
        }

        let mut next = self.current_config().fork();
        let changed = if join { next.add_peer(peer) } else { next.remove_peer(&peer) };
        if !changed {
            debug!(join, "membership request made no change; dropping");
            return vec![];
        }

        self.configurations.add(Arc::new(next.clone()));

        let request =
            Request::new_config(self.uuid.as_str().to_string(), self.now_ms(), next.to_json());
        let digest = request.digest();
        info!(config = %next.hash(), peers = next.len(), "proposing new configuration");
        self.broadcast_preprepare(request, digest, None)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Checkpoints and State Transfer
    // ═══════════════════════════════════════════════════════════════════════

    fn on_operation_executed(&mut self, sequence: u64, digest: Hash) -> Vec<Action> {
        let mut actions = vec![Action::NotifyExecuted { digest }];
        if sequence % self.config.checkpoint_interval == 0 {
            actions.extend(self.checkpoint_reached_locally(sequence));
        }
        actions
    }

    fn checkpoint_reached_locally(&mut self, sequence: u64) -> Vec<Action> {
        info!(sequence, "reached checkpoint");

        let state_hash = self.service.state_hash(sequence);
        let checkpoint = Checkpoint { sequence, state_hash };
        self.checkpoints.record_local(checkpoint);

        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::Checkpoint(CheckpointMsg {
                sequence,
                state_hash,
            })),
        }];
        actions.extend(self.maybe_stabilize(checkpoint));
        actions
    }

    fn handle_checkpoint(&mut self, from: NodeId, msg: CheckpointMsg) -> Vec<Action> {
        if msg.sequence <= self.checkpoints.stable().sequence {
            debug!(
                sequence = msg.sequence,
                stable = self.checkpoints.stable().sequence,
                "ignoring checkpoint message at or below the stable checkpoint"
            );
            return vec![];
        }

        let checkpoint = Checkpoint { sequence: msg.sequence, state_hash: msg.state_hash };
        debug!(sequence = msg.sequence, %from, "recording checkpoint proof");
        self.checkpoints.record_proof(checkpoint, from, msg);
        self.maybe_stabilize(checkpoint)
    }

    /// With a quorum of proofs: stabilize if we hold the checkpoint
    /// locally, otherwise fetch the state from a vouching peer.
    fn maybe_stabilize(&mut self, checkpoint: Checkpoint) -> Vec<Action> {
        if self.checkpoints.proof_count(&checkpoint) < self.quorum_size() {
            return vec![];
        }

        if self.checkpoints.has_local(&checkpoint) {
            self.do_stabilize(checkpoint);
            vec![]
        } else {
            self.request_checkpoint_state(checkpoint)
        }
    }

    fn do_stabilize(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.stabilize(checkpoint, self.config.high_water_span());
        self.log.clear_until(checkpoint.sequence);
        self.service.consolidate_log(checkpoint.sequence);
        self.recent_requests
            .prune_older_than(self.now_ms().saturating_sub(self.config.max_request_age_ms()));
    }

    /// Ask a uniformly random vouching peer for the checkpoint snapshot.
    fn request_checkpoint_state(&mut self, checkpoint: Checkpoint) -> Vec<Action> {
        let senders = self.checkpoints.proof_senders(&checkpoint);
        if senders.is_empty() {
            return vec![];
        }
        let selected = senders[self.rng.gen_range(0..senders.len())].clone();
        info!(
            sequence = checkpoint.sequence,
            state = %checkpoint.state_hash,
            peer = %selected,
            "requesting checkpoint state"
        );
        vec![Action::SendTo {
            peer: selected,
            message: OutboundMessage::Membership(MembershipMessage::GetState {
                sequence: checkpoint.sequence,
                state_hash: checkpoint.state_hash,
            }),
        }]
    }

    fn handle_get_state(&mut self, from: NodeId, sequence: u64, state_hash: Hash) -> Vec<Action> {
        let requested = Checkpoint { sequence, state_hash };
        if requested != self.checkpoints.stable() {
            debug!(sequence, "request for a checkpoint I don't have");
            return vec![];
        }

        match self.service.snapshot(sequence) {
            Some(snapshot) => vec![Action::SendTo {
                peer: from,
                message: OutboundMessage::Membership(MembershipMessage::SetState {
                    sequence,
                    state_hash,
                    snapshot,
                }),
            }],
            None => {
                warn!(sequence, "service no longer holds the stable checkpoint snapshot");
                vec![]
            }
        }
    }

    fn handle_set_state(&mut self, sequence: u64, state_hash: Hash, snapshot: Vec<u8>) -> Vec<Action> {
        let checkpoint = Checkpoint { sequence, state_hash };

        // Only adopt state we actually need: a quorum vouches for it and
        // we never reached it ourselves.
        if self.checkpoints.proof_count(&checkpoint) < self.quorum_size()
            || self.checkpoints.has_local(&checkpoint)
        {
            debug!(sequence, "received state for a checkpoint I don't need");
            return vec![];
        }

        if !self.service.install_snapshot(sequence, state_hash, &snapshot) {
            warn!(sequence, "snapshot from peer failed verification; discarding");
            return vec![];
        }

        info!(sequence, state = %state_hash, "adopting checkpoint via state transfer");
        self.do_stabilize(checkpoint);
        vec![]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View Changes
    // ═══════════════════════════════════════════════════════════════════════

    /// Stop participating in the current view and vote to move past it.
    fn initiate_view_change(&mut self) -> Vec<Action> {
        if self.view_change.own_sent() {
            return vec![];
        }

        self.view_is_valid = false;
        let mut actions = Vec::new();
        if self.audit_enabled {
            actions.push(Action::Broadcast {
                message: OutboundMessage::Audit(AuditMessage::FailureDetected {
                    sender: self.uuid.clone(),
                }),
            });
        }

        let stable = self.checkpoints.stable();
        let prepared_proofs: Vec<PreparedProof> = self
            .log
            .prepared_above(stable.sequence)
            .into_iter()
            .map(|op| PreparedProof {
                preprepare: op
                    .preprepare()
                    .cloned()
                    .expect("prepared operation has a preprepare"),
                prepares: op.prepare_evidence(),
            })
            .collect();

        let view_change = ViewChange {
            new_view: self.view + 1,
            stable_sequence: stable.sequence,
            checkpoint_proof: self.checkpoints.stable_proof(),
            prepared_proofs,
        };

        info!(new_view = view_change.new_view, "broadcasting view change");
        self.view_change.mark_own_sent();
        actions.push(Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::ViewChange(view_change)),
        });
        actions
    }

    fn handle_viewchange(&mut self, from: NodeId, view_change: ViewChange) -> Vec<Action> {
        if view_change.new_view != self.view + 1 {
            debug!(
                proposed = view_change.new_view,
                current = self.view,
                "dropping view change for an unexpected view"
            );
            return vec![];
        }

        self.view_change.record(from, view_change);

        let next_view = self.view + 1;
        if self.primary_of(next_view).uuid == self.uuid {
            // The prospective new primary needs 2f supporting votes.
            if self.view_change.count() >= 2 * self.max_faulty()
                && !self.view_change.newview_built()
            {
                return self.build_and_adopt_new_view(next_view);
            }
        } else if self.view_change.count() >= self.max_faulty() + 1
            && !self.view_change.own_sent()
        {
            // f+1 replicas already voted: at least one honest replica saw
            // the primary fail, so join even without a local timeout.
            info!(new_view = next_view, "joining view change (catch-up rule)");
            return self.initiate_view_change();
        }

        vec![]
    }

    fn build_and_adopt_new_view(&mut self, next_view: u64) -> Vec<Action> {
        self.view_change.mark_newview_built();

        let config_hash = self.current_config().hash();
        let new_view = self.view_change.build_new_view(next_view, config_hash);

        // Every re-established pre-prepare enters the local log as
        // accepted, exactly as if received in the normal case.
        let peers = self.peers_snapshot();
        for preprepare in &new_view.preprepares {
            let key: OperationKey = (preprepare.view, preprepare.sequence, preprepare.digest);
            self.log
                .find_or_create(key.0, key.1, key.2, peers.clone())
                .record_preprepare(preprepare.clone());
            self.log.accept_preprepare(key);
        }

        info!(view = next_view, preprepares = new_view.preprepares.len(), "broadcasting new view");
        self.view = next_view;
        self.view_is_valid = true;
        self.view_change.reset();

        vec![Action::Broadcast {
            message: OutboundMessage::Consensus(PbftMessage::NewView(new_view)),
        }]
    }

    fn handle_newview(&mut self, new_view: NewView) -> Vec<Action> {
        if new_view.view != self.view + 1 {
            debug!(
                proposed = new_view.view,
                current = self.view,
                "dropping new-view for an unexpected view"
            );
            return vec![];
        }

        let all_valid = new_view
            .view_changes
            .iter()
            .all(|pvc| pvc.view_change.new_view == new_view.view);
        if !all_valid {
            debug!("dropping new-view with invalid view-change set");
            return vec![];
        }

        if !self.configurations.is_enabled(&new_view.config_hash) {
            warn!(
                config = %new_view.config_hash,
                "refusing new-view whose configuration is not enabled here"
            );
            return vec![];
        }

        info!(view = new_view.view, "adopting new view");
        self.view = new_view.view;
        self.view_is_valid = true;
        self.view_change.reset();

        // Process the re-established pre-prepares as in the normal case,
        // re-broadcasting our PREPAREs.
        let mut actions = Vec::new();
        for preprepare in new_view.preprepares {
            actions.extend(self.handle_preprepare(preprepare));
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Audit
    // ═══════════════════════════════════════════════════════════════════════

    fn on_audit_timer(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_primary() && self.audit_enabled {
            actions.push(Action::Broadcast {
                message: OutboundMessage::Audit(AuditMessage::PrimaryStatus {
                    view: self.view,
                    primary: self.uuid.clone(),
                }),
            });
        }
        actions.push(Action::SetTimer {
            id: TimerId::AuditHeartbeat,
            duration: self.config.heartbeat_interval,
        });
        actions
    }
}

impl SubStateMachine for ReplicaState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::AuditTimer => self.on_audit_timer(),
            Event::ConsensusMessage { from, message } => self.on_consensus_message(from, message),
            Event::MembershipMessage { from, session, message } => {
                self.on_membership_message(from, session, message)
            }
            Event::PrimarySuspected => self.initiate_view_change(),
            Event::ClientRequest { session, request } => self.on_client_request(session, request),
            Event::OperationExecuted { sequence, digest } => {
                self.on_operation_executed(sequence, digest)
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }
}
