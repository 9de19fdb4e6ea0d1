//! View change collection and NEW-VIEW construction.
//!
//! A replica participates in a view change to view v+1 when its failure
//! detector gives up on the primary, or when it has seen view-change
//! votes from f+1 peers (the catch-up rule: if that many replicas think
//! the primary is gone, at least one honest one does).
//!
//! Counting uses `≥` thresholds with explicit "already acted" latches, so
//! duplicate or late view-change messages never re-trigger the own-vote
//! broadcast or a second NEW-VIEW.

use quorumkv_messages::{NewView, PeerViewChange, PrePrepare, ViewChange};
use quorumkv_types::{Hash, NodeId, Request};
use std::collections::BTreeMap;

/// Collects valid VIEW-CHANGE messages for the next view and builds the
/// NEW-VIEW when this replica is the prospective primary.
#[derive(Debug, Default)]
pub struct ViewChangeState {
    /// Valid view-change messages for view current+1, by sender.
    /// Re-sends from the same replica overwrite, never double-count.
    collected: BTreeMap<NodeId, ViewChange>,

    /// Latch: this replica has already broadcast its own view-change for
    /// the pending view.
    own_sent: bool,

    /// Latch: this replica (as prospective new primary) has already built
    /// and broadcast a NEW-VIEW for the pending view.
    newview_built: bool,
}

impl ViewChangeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a valid view-change message. The caller has already checked
    /// that it proposes the expected view.
    pub fn record(&mut self, sender: NodeId, view_change: ViewChange) {
        self.collected.insert(sender, view_change);
    }

    /// Distinct senders collected so far.
    pub fn count(&self) -> usize {
        self.collected.len()
    }

    pub fn own_sent(&self) -> bool {
        self.own_sent
    }

    pub fn mark_own_sent(&mut self) {
        self.own_sent = true;
    }

    pub fn newview_built(&self) -> bool {
        self.newview_built
    }

    pub fn mark_newview_built(&mut self) {
        self.newview_built = true;
    }

    /// Forget everything; called when a view is adopted (either via our
    /// own NEW-VIEW or a valid one from the new primary).
    pub fn reset(&mut self) {
        self.collected.clear();
        self.own_sent = false;
        self.newview_built = false;
    }

    /// The collected set as wire form (the V component of NEW-VIEW).
    pub fn collected(&self) -> Vec<PeerViewChange> {
        self.collected
            .iter()
            .map(|(sender, view_change)| PeerViewChange {
                sender: sender.clone(),
                view_change: view_change.clone(),
            })
            .collect()
    }

    /// Build the NEW-VIEW message for `new_view` from the collected set.
    ///
    /// The O component re-establishes, in the new view, every sequence in
    /// (min_s, max_s] where min_s is the highest stable checkpoint across
    /// V and max_s the highest prepared sequence in any P entry. A slot
    /// with a prepared proof keeps its digest (and request body when the
    /// proof carried one); slots nobody prepared are filled with NULL
    /// requests.
    pub fn build_new_view(&self, new_view: u64, config_hash: Hash) -> NewView {
        let view_changes = self.collected();

        let min_s = view_changes
            .iter()
            .map(|pvc| pvc.view_change.stable_sequence)
            .max()
            .unwrap_or(0);
        let max_s = view_changes
            .iter()
            .flat_map(|pvc| pvc.view_change.prepared_proofs.iter())
            .map(|proof| proof.preprepare.sequence)
            .max()
            .unwrap_or(min_s);

        let mut preprepares = Vec::new();
        for sequence in (min_s + 1)..=max_s {
            let proof = view_changes
                .iter()
                .flat_map(|pvc| pvc.view_change.prepared_proofs.iter())
                .find(|proof| proof.preprepare.sequence == sequence);

            let preprepare = match proof {
                Some(proof) => PrePrepare {
                    view: new_view,
                    sequence,
                    digest: proof.preprepare.digest,
                    request: proof.preprepare.request.clone(),
                },
                None => {
                    let null = Request::null();
                    PrePrepare {
                        view: new_view,
                        sequence,
                        digest: null.digest(),
                        request: Some(null),
                    }
                }
            };
            preprepares.push(preprepare);
        }

        NewView { view: new_view, view_changes, preprepares, config_hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_messages::{PeerPrepare, Prepare, PreparedProof};
    use quorumkv_types::RequestKind;

    fn request(tag: u64) -> Request {
        Request { client: "c".into(), timestamp: tag, kind: RequestKind::Null }
    }

    fn prepared_proof(sequence: u64, tag: u64) -> PreparedProof {
        let req = request(tag);
        let digest = req.digest();
        PreparedProof {
            preprepare: PrePrepare { view: 1, sequence, digest, request: Some(req) },
            prepares: vec![
                PeerPrepare {
                    sender: "a".into(),
                    prepare: Prepare { view: 1, sequence, digest, request: None },
                },
                PeerPrepare {
                    sender: "b".into(),
                    prepare: Prepare { view: 1, sequence, digest, request: None },
                },
                PeerPrepare {
                    sender: "d".into(),
                    prepare: Prepare { view: 1, sequence, digest, request: None },
                },
            ],
        }
    }

    fn view_change(stable_sequence: u64, proofs: Vec<PreparedProof>) -> ViewChange {
        ViewChange {
            new_view: 2,
            stable_sequence,
            checkpoint_proof: vec![],
            prepared_proofs: proofs,
        }
    }

    #[test]
    fn duplicate_senders_do_not_double_count() {
        let mut state = ViewChangeState::new();
        state.record("a".into(), view_change(0, vec![]));
        state.record("a".into(), view_change(0, vec![]));
        assert_eq!(state.count(), 1);
        state.record("b".into(), view_change(0, vec![]));
        assert_eq!(state.count(), 2);
    }

    #[test]
    fn new_view_covers_the_gap_with_proofs_and_nulls() {
        let mut state = ViewChangeState::new();
        state.record("a".into(), view_change(100, vec![prepared_proof(103, 3)]));
        state.record("b".into(), view_change(100, vec![prepared_proof(101, 1)]));

        let new_view = state.build_new_view(2, Hash::digest(b"config"));

        assert_eq!(new_view.view, 2);
        assert_eq!(new_view.preprepares.len(), 3); // 101, 102, 103

        let by_seq: BTreeMap<u64, &PrePrepare> =
            new_view.preprepares.iter().map(|pp| (pp.sequence, pp)).collect();
        assert_eq!(by_seq[&101].digest, request(1).digest());
        assert_eq!(by_seq[&103].digest, request(3).digest());
        // 102 was prepared nowhere: a NULL filler.
        assert_eq!(by_seq[&102].digest, Request::null().digest());
        assert!(by_seq.values().all(|pp| pp.view == 2));
    }

    #[test]
    fn new_view_with_no_prepared_operations_is_empty() {
        let mut state = ViewChangeState::new();
        state.record("a".into(), view_change(200, vec![]));
        let new_view = state.build_new_view(2, Hash::digest(b"config"));
        assert!(new_view.preprepares.is_empty());
        assert_eq!(new_view.view_changes.len(), 1);
    }

    #[test]
    fn min_s_is_the_highest_stable_checkpoint_across_v() {
        let mut state = ViewChangeState::new();
        // A laggard still below sequence 100 prepared something old; the
        // proof below the collective stable checkpoint must not resurface.
        state.record("a".into(), view_change(0, vec![prepared_proof(50, 5)]));
        state.record("b".into(), view_change(100, vec![]));

        let new_view = state.build_new_view(2, Hash::digest(b"config"));
        assert!(new_view.preprepares.is_empty());
    }

    #[test]
    fn reset_clears_latches_and_collection() {
        let mut state = ViewChangeState::new();
        state.record("a".into(), view_change(0, vec![]));
        state.mark_own_sent();
        state.mark_newview_built();
        state.reset();
        assert_eq!(state.count(), 0);
        assert!(!state.own_sent());
        assert!(!state.newview_built());
    }
}
