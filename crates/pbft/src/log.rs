//! The operation log.

use crate::{Operation, OperationKey};
use quorumkv_types::{Hash, PeerAddress};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// All live agreement instances, keyed by (view, sequence, digest), plus
/// the table of accepted pre-prepares enforcing non-equivocation per
/// (view, sequence).
#[derive(Debug, Default)]
pub struct OperationLog {
    operations: BTreeMap<OperationKey, Operation>,
    accepted_preprepares: BTreeMap<(u64, u64), OperationKey>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// This replica's record of an operation, created on first reference.
    /// The peer snapshot is captured at creation and used for all quorum
    /// math thereafter.
    pub fn find_or_create(
        &mut self,
        view: u64,
        sequence: u64,
        digest: Hash,
        peers: Arc<Vec<PeerAddress>>,
    ) -> &mut Operation {
        self.operations.entry((view, sequence, digest)).or_insert_with(|| {
            debug!(view, sequence, %digest, "creating operation record");
            Operation::new(view, sequence, digest, peers)
        })
    }

    pub fn get(&self, key: &OperationKey) -> Option<&Operation> {
        self.operations.get(key)
    }

    pub fn get_mut(&mut self, key: &OperationKey) -> Option<&mut Operation> {
        self.operations.get_mut(key)
    }

    /// The digest already accepted at (view, sequence), if any.
    pub fn accepted_digest(&self, view: u64, sequence: u64) -> Option<Hash> {
        self.accepted_preprepares.get(&(view, sequence)).map(|(_, _, digest)| *digest)
    }

    /// Would a pre-prepare for this digest conflict with one already
    /// accepted at (view, sequence)?
    pub fn conflicts_with_accepted(&self, view: u64, sequence: u64, digest: Hash) -> bool {
        matches!(self.accepted_digest(view, sequence), Some(accepted) if accepted != digest)
    }

    /// Mark the pre-prepare at this key as accepted. Redundant re-marking
    /// of the same key is fine.
    pub fn accept_preprepare(&mut self, key: OperationKey) {
        self.accepted_preprepares.insert((key.0, key.1), key);
    }

    /// Operations prepared but not yet committed above `sequence`; the P
    /// component of a view-change message.
    pub fn prepared_above(&self, sequence: u64) -> Vec<&Operation> {
        self.operations
            .values()
            .filter(|op| op.sequence > sequence && op.is_prepared() && !op.is_committed())
            .collect()
    }

    /// Drop every operation (and accepted pre-prepare) at or below
    /// `sequence`. Called when a checkpoint stabilizes.
    pub fn clear_until(&mut self, sequence: u64) {
        let before = self.operations.len();
        self.operations.retain(|_, op| op.sequence > sequence);
        self.accepted_preprepares.retain(|&(_, s), _| s > sequence);
        debug!(
            cleared = before - self.operations.len(),
            through = sequence,
            "cleared old operation records"
        );
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }
}
