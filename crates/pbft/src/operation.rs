//! Per-slot agreement record.

use quorumkv_core::SessionId;
use quorumkv_messages::{PeerPrepare, PrePrepare, Prepare};
use quorumkv_types::{Hash, NodeId, PeerAddress, Request};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Uniquely identifies an agreement instance: (view, sequence, digest).
pub type OperationKey = (u64, u64, Hash);

/// Where an operation stands in the three-phase protocol.
///
/// Phases only move forward: `Prepare → Commit` (legal once prepared) and
/// `Commit → Committed` (legal once committed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Prepare,
    Commit,
    Committed,
}

/// The record of one slot's progress through agreement.
///
/// Accumulates the pre-prepare, prepare, and commit evidence for
/// (view, sequence, digest). The peer set is snapshotted at creation so
/// that quorum arithmetic never observes a configuration that changed
/// mid-slot.
#[derive(Debug, Clone)]
pub struct Operation {
    pub view: u64,
    pub sequence: u64,
    pub digest: Hash,

    /// Peers at creation time; the denominator for quorum math.
    peers: Arc<Vec<PeerAddress>>,

    phase: OperationPhase,

    preprepare: Option<PrePrepare>,
    prepares: BTreeMap<NodeId, Prepare>,
    commits: BTreeSet<NodeId>,

    request: Option<Request>,

    /// The originating client session, when this replica owes a response.
    /// Weak by construction: the session may be gone by commit time.
    session: Option<SessionId>,
}

impl Operation {
    pub fn new(view: u64, sequence: u64, digest: Hash, peers: Arc<Vec<PeerAddress>>) -> Self {
        Self {
            view,
            sequence,
            digest,
            peers,
            phase: OperationPhase::Prepare,
            preprepare: None,
            prepares: BTreeMap::new(),
            commits: BTreeSet::new(),
            request: None,
            session: None,
        }
    }

    pub fn key(&self) -> OperationKey {
        (self.view, self.sequence, self.digest)
    }

    pub fn phase(&self) -> OperationPhase {
        self.phase
    }

    /// Upper bound on faulty replicas this operation's peer snapshot
    /// tolerates: f = ⌊(n-1)/3⌋, so a 3-peer group has f = 0 and a 4-peer
    /// group has f = 1.
    pub fn faulty_bound(&self) -> usize {
        self.peers.len().saturating_sub(1) / 3
    }

    /// Record the accepted pre-prepare. Idempotent; a later identical
    /// pre-prepare simply refreshes the stored message.
    pub fn record_preprepare(&mut self, preprepare: PrePrepare) {
        self.maybe_record_request(preprepare.request.clone());
        self.preprepare = Some(preprepare);
    }

    pub fn has_preprepare(&self) -> bool {
        self.preprepare.is_some()
    }

    /// The recorded pre-prepare, for view-change prepared proofs.
    pub fn preprepare(&self) -> Option<&PrePrepare> {
        self.preprepare.as_ref()
    }

    /// Record a prepare from `sender`. Idempotent by sender.
    pub fn record_prepare(&mut self, sender: NodeId, prepare: Prepare) {
        self.maybe_record_request(prepare.request.clone());
        self.prepares.entry(sender).or_insert(prepare);
    }

    /// Record a commit from `sender`. Idempotent by sender.
    pub fn record_commit(&mut self, sender: NodeId, request: Option<Request>) {
        self.maybe_record_request(request);
        self.commits.insert(sender);
    }

    /// Prepared: pre-prepare seen, request known, prepares from more than
    /// 2f distinct replicas.
    pub fn is_prepared(&self) -> bool {
        self.has_preprepare()
            && self.has_request()
            && self.prepares.len() > 2 * self.faulty_bound()
    }

    /// Committed: prepared, plus commits from more than 2f distinct
    /// replicas.
    pub fn is_committed(&self) -> bool {
        self.is_prepared() && self.commits.len() > 2 * self.faulty_bound()
    }

    /// The recorded prepare messages with their senders, for view-change
    /// prepared proofs.
    pub fn prepare_evidence(&self) -> Vec<PeerPrepare> {
        self.prepares
            .iter()
            .map(|(sender, prepare)| PeerPrepare {
                sender: sender.clone(),
                prepare: prepare.clone(),
            })
            .collect()
    }

    /// Enter the commit phase.
    ///
    /// Panics if the operation is not prepared or is not in the prepare
    /// phase: calling this without the predicate holding means the replica
    /// logic itself is corrupt, which is not recoverable.
    pub fn begin_commit_phase(&mut self) {
        assert!(
            self.is_prepared() && self.phase == OperationPhase::Prepare,
            "illegal commit-phase entry for operation (v{}, s{})",
            self.view,
            self.sequence
        );
        self.phase = OperationPhase::Commit;
    }

    /// Finish the commit phase. Panics under the same corruption rule as
    /// [`Operation::begin_commit_phase`].
    pub fn end_commit_phase(&mut self) {
        assert!(
            self.is_committed() && self.phase == OperationPhase::Commit,
            "illegal commit-phase exit for operation (v{}, s{})",
            self.view,
            self.sequence
        );
        self.phase = OperationPhase::Committed;
    }

    /// Attach a request body received outside the protocol messages.
    /// The caller has already verified it against the digest.
    pub fn record_request(&mut self, request: Request) {
        self.request = Some(request);
    }

    fn maybe_record_request(&mut self, request: Option<Request>) {
        if self.request.is_none() {
            if let Some(request) = request {
                if request.digest() == self.digest {
                    self.request = Some(request);
                } else {
                    debug!(
                        sequence = self.sequence,
                        "not recording request whose digest does not match"
                    );
                }
            }
        }
    }

    pub fn has_request(&self) -> bool {
        self.request.is_some()
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn set_session(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }
}
