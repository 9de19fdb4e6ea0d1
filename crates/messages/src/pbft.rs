//! Agreement protocol messages.

use borsh::{BorshDeserialize, BorshSerialize};
use quorumkv_types::{Hash, NodeId, Request};

/// The primary's proposal binding a request digest to a (view, sequence)
/// slot. Carries the full request body when originated by the primary;
/// re-established pre-prepares from a NEW-VIEW may omit it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PrePrepare {
    pub view: u64,
    pub sequence: u64,
    pub digest: Hash,
    pub request: Option<Request>,
}

/// A replica's attestation that it accepted the pre-prepare at
/// (view, sequence, digest). The request body is normally absent; a sender
/// may attach it for a peer that missed the pre-prepare.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Prepare {
    pub view: u64,
    pub sequence: u64,
    pub digest: Hash,
    pub request: Option<Request>,
}

/// A replica's attestation that the operation prepared locally.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub view: u64,
    pub sequence: u64,
    pub digest: Hash,
    pub request: Option<Request>,
}

/// A replica vouching for its service state at a checkpoint boundary.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CheckpointMsg {
    pub sequence: u64,
    pub state_hash: Hash,
}

/// A checkpoint message together with the replica that sent it; the unit
/// of checkpoint proof sets.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PeerCheckpoint {
    pub sender: NodeId,
    pub checkpoint: CheckpointMsg,
}

/// A prepare message together with the replica that sent it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PeerPrepare {
    pub sender: NodeId,
    pub prepare: Prepare,
}

/// Evidence that an operation prepared at the sender: its accepted
/// pre-prepare and prepare messages from more than 2f distinct replicas.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparedProof {
    pub preprepare: PrePrepare,
    pub prepares: Vec<PeerPrepare>,
}

/// A replica's vote to move to `new_view`, carrying its stable checkpoint
/// proof (C) and prepared-but-uncommitted operations (P).
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ViewChange {
    pub new_view: u64,
    /// Sequence of the sender's latest stable checkpoint.
    pub stable_sequence: u64,
    /// Quorum of matching checkpoint messages proving the stable checkpoint.
    pub checkpoint_proof: Vec<PeerCheckpoint>,
    /// One proof per operation prepared (but not committed) above the
    /// stable checkpoint.
    pub prepared_proofs: Vec<PreparedProof>,
}

/// A view-change message together with the replica that sent it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PeerViewChange {
    pub sender: NodeId,
    pub view_change: ViewChange,
}

/// The new primary's announcement of `view`, justified by the view-change
/// set V and carrying the re-established pre-prepares O.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub view: u64,
    /// The view-change messages this NEW-VIEW is built from.
    pub view_changes: Vec<PeerViewChange>,
    /// Fresh pre-prepares in `view` covering every sequence between the
    /// highest stable checkpoint and the highest prepared sequence in V.
    pub preprepares: Vec<PrePrepare>,
    /// Content hash of the primary's current configuration; receivers
    /// refuse the move unless they have enabled this configuration.
    pub config_hash: Hash,
}

/// Tagged union of the agreement protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PbftMessage {
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    Checkpoint(CheckpointMsg),
    ViewChange(ViewChange),
    NewView(NewView),
}

impl PbftMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            PbftMessage::PrePrepare(_) => "PrePrepare",
            PbftMessage::Prepare(_) => "Prepare",
            PbftMessage::Commit(_) => "Commit",
            PbftMessage::Checkpoint(_) => "Checkpoint",
            PbftMessage::ViewChange(_) => "ViewChange",
            PbftMessage::NewView(_) => "NewView",
        }
    }

    /// The view this message speaks about, where applicable.
    pub fn view(&self) -> Option<u64> {
        match self {
            PbftMessage::PrePrepare(m) => Some(m.view),
            PbftMessage::Prepare(m) => Some(m.view),
            PbftMessage::Commit(m) => Some(m.view),
            PbftMessage::Checkpoint(_) => None,
            PbftMessage::ViewChange(m) => Some(m.new_view),
            PbftMessage::NewView(m) => Some(m.view),
        }
    }

    /// The log sequence this message addresses, for the three-phase
    /// messages that are subject to the water-mark window.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            PbftMessage::PrePrepare(m) => Some(m.sequence),
            PbftMessage::Prepare(m) => Some(m.sequence),
            PbftMessage::Commit(m) => Some(m.sequence),
            _ => None,
        }
    }

    /// True for PRE-PREPARE/PREPARE/COMMIT, the messages filtered by view
    /// and sequence window.
    pub fn is_three_phase(&self) -> bool {
        matches!(
            self,
            PbftMessage::PrePrepare(_) | PbftMessage::Prepare(_) | PbftMessage::Commit(_)
        )
    }

    /// True for the messages still accepted while the local view is
    /// invalid (checkpointing and view recovery must make progress).
    pub fn allowed_during_view_change(&self) -> bool {
        matches!(
            self,
            PbftMessage::Checkpoint(_) | PbftMessage::ViewChange(_) | PbftMessage::NewView(_)
        )
    }
}
