//! Checkpoint bookkeeping and the log window.

use quorumkv_messages::{CheckpointMsg, PeerCheckpoint};
use quorumkv_types::{Checkpoint, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Tracks local unstable checkpoints, peer checkpoint proofs, the stable
/// checkpoint, and the low/high water marks bounding the accepted
/// sequence window.
#[derive(Debug)]
pub struct CheckpointManager {
    /// The latest checkpoint a quorum vouches for and we hold locally.
    stable: Checkpoint,
    /// The quorum of checkpoint messages proving `stable`.
    stable_proof: BTreeMap<NodeId, CheckpointMsg>,

    /// Checkpoints this replica has reached but that are not yet stable.
    local_unstable: BTreeSet<Checkpoint>,
    /// Peer proofs for checkpoints above the stable one.
    unstable_proofs: BTreeMap<Checkpoint, BTreeMap<NodeId, CheckpointMsg>>,

    /// Sequence window: messages with sequence ∉ (low, high] are dropped.
    low_water_mark: u64,
    high_water_mark: u64,
}

impl CheckpointManager {
    /// Start from a stable checkpoint (the genesis checkpoint for a fresh
    /// replica, or a persisted one after restart) and its proof.
    pub fn new(stable: Checkpoint, proof: Vec<PeerCheckpoint>, high_water_span: u64) -> Self {
        let stable_proof = proof
            .into_iter()
            .map(|pc| (pc.sender, pc.checkpoint))
            .collect();
        Self {
            low_water_mark: stable.sequence,
            high_water_mark: stable.sequence + high_water_span,
            stable,
            stable_proof,
            local_unstable: BTreeSet::new(),
            unstable_proofs: BTreeMap::new(),
        }
    }

    pub fn stable(&self) -> Checkpoint {
        self.stable
    }

    /// The stable proof as peer checkpoint messages (the C component of a
    /// view-change message).
    pub fn stable_proof(&self) -> Vec<PeerCheckpoint> {
        self.stable_proof
            .iter()
            .map(|(sender, checkpoint)| PeerCheckpoint {
                sender: sender.clone(),
                checkpoint: checkpoint.clone(),
            })
            .collect()
    }

    /// The newest checkpoint this replica has reached: the latest local
    /// unstable one, or the stable one if none.
    pub fn latest(&self) -> Checkpoint {
        self.local_unstable.iter().next_back().copied().unwrap_or(self.stable)
    }

    pub fn unstable_count(&self) -> usize {
        self.local_unstable.len()
    }

    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    /// Is this sequence inside the accepted window (low, high]?
    pub fn in_window(&self, sequence: u64) -> bool {
        sequence > self.low_water_mark && sequence <= self.high_water_mark
    }

    /// Record that this replica reached a checkpoint locally.
    pub fn record_local(&mut self, checkpoint: Checkpoint) {
        self.local_unstable.insert(checkpoint);
    }

    pub fn has_local(&self, checkpoint: &Checkpoint) -> bool {
        self.local_unstable.contains(checkpoint)
    }

    /// Record a peer's checkpoint message as proof for (sequence, hash).
    /// Idempotent by sender.
    pub fn record_proof(&mut self, checkpoint: Checkpoint, sender: NodeId, msg: CheckpointMsg) {
        self.unstable_proofs.entry(checkpoint).or_default().insert(sender, msg);
    }

    /// Number of distinct replicas vouching for this checkpoint.
    pub fn proof_count(&self, checkpoint: &Checkpoint) -> usize {
        self.unstable_proofs.get(checkpoint).map_or(0, |proofs| proofs.len())
    }

    /// The replicas vouching for this checkpoint, in uuid order.
    pub fn proof_senders(&self, checkpoint: &Checkpoint) -> Vec<NodeId> {
        self.unstable_proofs
            .get(checkpoint)
            .map(|proofs| proofs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make `checkpoint` the stable checkpoint: adopt its proof set, drop
    /// all unstable bookkeeping at or below it, and advance the water
    /// marks. Stabilization is monotone; the caller never passes a
    /// checkpoint at or below the current stable sequence.
    pub fn stabilize(&mut self, checkpoint: Checkpoint, high_water_span: u64) {
        info!(
            sequence = checkpoint.sequence,
            state = %checkpoint.state_hash,
            "checkpoint is now stable; clearing old data"
        );

        self.stable_proof = self.unstable_proofs.get(&checkpoint).cloned().unwrap_or_default();
        self.stable = checkpoint;

        let local_removed = {
            let before = self.local_unstable.len();
            self.local_unstable.retain(|cp| cp.sequence > checkpoint.sequence);
            before - self.local_unstable.len()
        };
        let proofs_removed = {
            let before = self.unstable_proofs.len();
            self.unstable_proofs.retain(|cp, _| cp.sequence > checkpoint.sequence);
            before - self.unstable_proofs.len()
        };
        debug!(local_removed, proofs_removed, "cleared unstable checkpoint state");

        self.low_water_mark = self.low_water_mark.max(checkpoint.sequence);
        self.high_water_mark = self.high_water_mark.max(checkpoint.sequence + high_water_span);
    }
}
