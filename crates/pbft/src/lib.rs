//! PBFT replication engine.
//!
//! This crate provides a synchronous PBFT implementation that can be used
//! for both simulation and production.
//!
//! # Architecture
//!
//! The replica state machine processes events synchronously:
//!
//! - `Event::ClientRequest` → admit, assign a sequence, broadcast PRE-PREPARE
//!   (primary) or forward to the primary (backup)
//! - `Event::ConsensusMessage` → move operations through the three-phase
//!   protocol, collect checkpoint proofs, participate in view changes
//! - `Event::OperationExecuted` → checkpoint bookkeeping at interval
//!   boundaries
//! - `Event::PrimarySuspected` → initiate a view change
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **View**: Monotone integer naming the current primary epoch. The
//!   primary of view v is `peers_sorted[v mod n]`.
//!
//! - **Sequence**: Monotone integer naming a slot in the ordered log.
//!   Assigned by the primary; executed by the service with no gaps.
//!
//! - **Operation**: The per-(view, sequence, digest) record accumulating
//!   three-phase evidence. Prepared with pre-prepare + request + >2f
//!   prepares; committed with >2f commits on top.
//!
//! - **Checkpoint**: (sequence, state hash) snapshot taken every
//!   `checkpoint_interval` executed operations. Stable once a quorum of
//!   replicas vouch for it; stabilization trims the log and advances the
//!   water marks.
//!
//! # Safety
//!
//! - **Non-equivocation**: At most one request digest is ever accepted per
//!   (view, sequence); a conflicting pre-prepare is rejected.
//!
//! - **Quorum intersection**: Any two quorums of 2f+1 in a group of 3f+1
//!   overlap in at least one honest replica, so conflicting operations
//!   cannot both commit.
//!
//! - **View changes**: A new primary must justify its NEW-VIEW with 2f
//!   view-change messages and re-establish every operation prepared above
//!   the last stable checkpoint.
//!
//! # Liveness
//!
//! - **Failure detection**: An external failure detector signals a
//!   suspected primary; the replica then votes to move to the next view.
//!
//! - **Catch-up rule**: A replica that sees f+1 view-change votes joins the
//!   view change even if its own detector has not fired.
//!
//! - **State transfer**: A replica holding a quorum of checkpoint proofs
//!   without the local checkpoint fetches the snapshot from a vouching peer.

mod checkpoints;
mod config;
mod config_store;
mod log;
mod operation;
mod recent;
mod service;
mod state;
mod view_change;

pub use checkpoints::CheckpointManager;
pub use config::PbftConfig;
pub use config_store::ConfigStore;
pub use log::OperationLog;
pub use operation::{Operation, OperationKey, OperationPhase};
pub use recent::RecentRequests;
pub use service::{ExecutedOp, Service};
pub use state::{RecoveredState, ReplicaState};
pub use view_change::ViewChangeState;
