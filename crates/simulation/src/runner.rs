//! Deterministic simulation runner.
//!
//! Each node has its own service. When a node emits
//! `Action::ApplyOperation`, the runner calls that node's service inline
//! (synchronously) for deterministic execution.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use quorumkv_core::{Action, Event, OutboundMessage, SessionId, StateMachine, TimerId};
use quorumkv_kv::KvService;
use quorumkv_messages::{
    decode_envelope, encode_envelope, ClientDatabaseRequest, Envelope, EnvelopePayload,
};
use quorumkv_node::NodeStateMachine;
use quorumkv_pbft::{PbftConfig, RecoveredState, Service};
use quorumkv_types::{Configuration, DatabaseMsg, DatabaseResponse, NodeId, PeerAddress};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Per-node service. Each node executes against its own store.
    services: Vec<Arc<KvService>>,

    /// Routing: replica uuid → node index.
    index_by_uuid: HashMap<NodeId, NodeIndex>,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Insertion counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    /// Network simulator.
    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Session allocation for injected client requests.
    next_session: u64,

    /// Sessions awaiting an execution response: (node, sequence) → session.
    pending_sessions: HashMap<(NodeIndex, u64), SessionId>,

    /// Responses delivered to client sessions, in delivery order.
    responses: Vec<(SessionId, DatabaseResponse)>,

    /// Statistics.
    stats: SimulationStats,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by partitions or packet loss.
    pub messages_dropped: u64,
    /// Messages aimed at a uuid with no running node.
    pub messages_unroutable: u64,
    /// Audit notices emitted (not delivered to replicas).
    pub audit_notices: u64,
    /// Failure-detector execution notifications.
    pub executed_notifications: u64,
    /// Responses that found no live session.
    pub responses_dropped: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
}

impl SimulationRunner {
    /// Create a runner with `num_nodes` replicas in one swarm.
    ///
    /// Peer uuids are `replica-00`, `replica-01`, and so on, so that the
    /// sorted order is the numeric order.
    pub fn new(num_nodes: u32, network_config: NetworkConfig, pbft: PbftConfig, seed: u64) -> Self {
        let peers: Vec<PeerAddress> = (0..num_nodes).map(Self::peer_address).collect();
        let bootstrap =
            Configuration::from_peers(peers.clone()).expect("bootstrap peers are valid");

        let mut runner = Self {
            nodes: Vec::new(),
            services: Vec::new(),
            index_by_uuid: HashMap::new(),
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(network_config),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            next_session: 1,
            pending_sessions: HashMap::new(),
            responses: Vec::new(),
            stats: SimulationStats::default(),
        };

        for (i, peer) in peers.iter().enumerate() {
            runner.add_node_with_bootstrap(peer.clone(), bootstrap.clone(), seed ^ (i as u64));
        }

        info!(num_nodes, seed, "created simulation runner");
        runner
    }

    /// The canonical simulation peer address for index `i`.
    pub fn peer_address(i: u32) -> PeerAddress {
        PeerAddress::new(
            format!("host{i}"),
            (8000 + i) as u16,
            (9000 + i) as u16,
            format!("name{i}"),
            format!("replica-{i:02}"),
        )
    }

    /// Add a node (e.g., one about to join the swarm). Returns its index.
    pub fn add_node_with_bootstrap(
        &mut self,
        peer: PeerAddress,
        bootstrap: Configuration,
        transfer_seed: u64,
    ) -> NodeIndex {
        let index = self.nodes.len() as NodeIndex;
        let pbft = PbftConfig {
            state_transfer_seed: Some(transfer_seed),
            ..PbftConfig::default()
        };
        let service = Arc::new(KvService::new(pbft.checkpoint_interval));
        let node = NodeStateMachine::new(
            peer.uuid.clone(),
            bootstrap,
            service.clone() as Arc<dyn quorumkv_pbft::Service>,
            pbft,
            RecoveredState::default(),
        );
        self.index_by_uuid.insert(peer.uuid.clone(), index);
        self.nodes.push(node);
        self.services.push(service);
        index
    }

    /// Run every node's startup actions (initial timers).
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() as NodeIndex {
            let actions = self.nodes[index as usize].start();
            for action in actions {
                self.process_action(index, action);
            }
        }
    }

    // ─── Accessors ───

    pub fn node(&self, index: NodeIndex) -> &NodeStateMachine {
        &self.nodes[index as usize]
    }

    pub fn service(&self, index: NodeIndex) -> &Arc<KvService> {
        &self.services[index as usize]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Responses delivered to client sessions so far.
    pub fn responses(&self) -> &[(SessionId, DatabaseResponse)] {
        &self.responses
    }

    /// The node currently acting as primary, according to `observer`.
    pub fn primary_index(&self, observer: NodeIndex) -> NodeIndex {
        let primary = self.node(observer).replica().primary();
        self.index_by_uuid[&primary.uuid]
    }

    // ─── Injection ───

    /// Submit a client database request to a node. Returns the session the
    /// response will be addressed to.
    pub fn submit_request(
        &mut self,
        node: NodeIndex,
        client: &str,
        msg: &DatabaseMsg,
    ) -> SessionId {
        let session = SessionId(self.next_session);
        self.next_session += 1;

        let wrapped = ClientDatabaseRequest::wrap(client, self.now.as_millis() as u64, msg);
        let event = Event::ClientRequest { session: Some(session), request: wrapped };
        self.schedule_event(node, self.now, event);
        session
    }

    /// Deliver a membership message (JOIN/LEAVE) to a node as if sent by
    /// `peer`.
    pub fn submit_membership(
        &mut self,
        node: NodeIndex,
        from: NodeId,
        message: quorumkv_messages::MembershipMessage,
    ) {
        let event = Event::MembershipMessage { from, session: None, message };
        self.schedule_event(node, self.now, event);
    }

    /// Fire the external failure detector at a node.
    pub fn suspect_primary(&mut self, node: NodeIndex) {
        self.schedule_event(node, self.now, Event::PrimarySuspected);
    }

    // ─── Event Loop ───

    fn schedule_event(&mut self, node_index: NodeIndex, time: Duration, event: Event) -> EventKey {
        let key = EventKey {
            time,
            priority: event.priority(),
            sequence: self.sequence,
            node_index,
        };
        self.sequence += 1;
        self.event_queue.insert(key, event);
        key
    }

    /// Run the simulation until the queue drains or `end_time` is reached.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((&key, _)) = self.event_queue.first_key_value() {
            if key.time > end_time {
                debug!(remaining = self.event_queue.len(), "time limit reached");
                break;
            }

            let (key, event) = self.event_queue.pop_first().unwrap();
            self.now = key.time;
            let node_index = key.node_index;

            trace!(time = ?self.now, node = node_index, kind = event.type_name(), "processing event");
            self.stats.events_processed += 1;

            let node = &mut self.nodes[node_index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);
            self.stats.actions_generated += actions.len() as u64;

            for action in actions {
                self.process_action(node_index, action);
            }
        }
    }

    /// Convenience: advance the clock by `step` repeatedly, `times` times.
    pub fn run_for(&mut self, step: Duration, times: u32) {
        for _ in 0..times {
            let end = self.now + step;
            self.run_until(end);
            self.now = end;
        }
    }

    // ─── Action Execution ───

    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                if let OutboundMessage::Audit(_) = message {
                    self.stats.audit_notices += 1;
                    return;
                }
                // Fan out to every peer in the sender's current
                // configuration, including the sender itself.
                let peers = self.nodes[from as usize].replica().current_peers();
                for peer in peers {
                    self.route_message(from, &peer.uuid, &message);
                }
            }

            Action::SendTo { peer, message } => {
                self.route_message(from, &peer, &message);
            }

            Action::RespondToClient { session, response } => {
                self.responses.push((session, response));
            }

            Action::SetTimer { id, duration } => {
                // A re-set timer replaces the queued firing.
                if let Some(stale) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&stale);
                }
                let fire_time = self.now + duration;
                let key = self.schedule_event(from, fire_time, Self::timer_event(id));
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                    debug!(node = from, ?id, "timer cancelled");
                }
            }

            Action::EnqueueInternal { event } => {
                self.schedule_event(from, self.now, event);
            }

            Action::ApplyOperation { sequence, digest, request, session } => {
                if let Some(session) = session {
                    self.pending_sessions.insert((from, sequence), session);
                }
                let executed = self.services[from as usize].apply(sequence, digest, request);
                for op in executed {
                    if let Some(response) = op.response {
                        match self.pending_sessions.remove(&(from, op.sequence)) {
                            Some(session) => self.responses.push((session, response)),
                            None => {
                                // No session here: either the request came
                                // in via a peer, or the client is gone.
                                self.stats.responses_dropped += 1;
                                debug!(node = from, sequence = op.sequence, "no session for response");
                            }
                        }
                    }
                    let event =
                        Event::OperationExecuted { sequence: op.sequence, digest: op.digest };
                    self.schedule_event(from, self.now, event);
                }
            }

            Action::NotifyExecuted { .. } => {
                // The failure detector is external to the simulation.
                self.stats.executed_notifications += 1;
            }
        }
    }

    /// Encode, "transmit", decode, and schedule a message, exactly as a
    /// real transport would. Undecodable bytes are logged and dropped.
    fn route_message(&mut self, from: NodeIndex, to_uuid: &NodeId, message: &OutboundMessage) {
        let Some(&to) = self.index_by_uuid.get(to_uuid) else {
            warn!(%to_uuid, "message to a uuid with no running node");
            self.stats.messages_unroutable += 1;
            return;
        };

        match self.network.should_deliver(from, to, &mut self.rng) {
            Some(latency) => {
                let from_uuid = self.nodes[from as usize].uuid().clone();
                let envelope = Envelope::new(from_uuid, Self::payload_of(message.clone()));
                let bytes = match encode_envelope(&envelope) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(%err, "failed to encode envelope");
                        return;
                    }
                };
                let decoded = match decode_envelope(&bytes) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(%err, "dropping undecodable envelope");
                        return;
                    }
                };
                let event = Self::envelope_to_event(decoded);
                self.schedule_event(to, self.now + latency, event);
                self.stats.messages_sent += 1;
            }
            None => {
                self.stats.messages_dropped += 1;
            }
        }
    }

    fn payload_of(message: OutboundMessage) -> EnvelopePayload {
        match message {
            OutboundMessage::Consensus(message) => EnvelopePayload::Consensus(message),
            OutboundMessage::Membership(message) => EnvelopePayload::Membership(message),
            OutboundMessage::Audit(message) => EnvelopePayload::Audit(message),
            OutboundMessage::Database(request) => EnvelopePayload::Database(request),
        }
    }

    fn envelope_to_event(envelope: Envelope) -> Event {
        let from = envelope.sender;
        match envelope.payload {
            EnvelopePayload::Consensus(message) => Event::ConsensusMessage { from, message },
            EnvelopePayload::Membership(message) => {
                Event::MembershipMessage { from, session: None, message }
            }
            EnvelopePayload::Database(request) => {
                Event::ClientRequest { session: None, request }
            }
            // Audit notices are intercepted before routing; an envelope
            // carrying one would be a runner bug.
            EnvelopePayload::Audit(_) => unreachable!("audit notices are not routed to replicas"),
        }
    }

    fn timer_event(id: TimerId) -> Event {
        match id {
            TimerId::AuditHeartbeat => Event::AuditTimer,
        }
    }
}
