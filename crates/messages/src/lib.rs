//! Network messages for the replication protocol.
//!
//! Every message travels inside an [`Envelope`] naming its sender and one
//! of four inner payload families:
//!
//! - [`PbftMessage`]: the agreement protocol (PRE-PREPARE, PREPARE, COMMIT,
//!   CHECKPOINT, VIEW-CHANGE, NEW-VIEW)
//! - [`MembershipMessage`]: join/leave and state transfer
//! - [`AuditMessage`]: observability notices
//! - [`ClientDatabaseRequest`]: wrapped client database requests
//!
//! The wire encoding is a canonical length-prefixed binary schema (borsh)
//! behind a single version byte; request fingerprints are computed over the
//! same canonical form.

pub mod audit;
pub mod client;
pub mod codec;
pub mod envelope;
pub mod membership;
pub mod pbft;

pub use audit::AuditMessage;
pub use client::ClientDatabaseRequest;
pub use codec::{decode_envelope, encode_envelope, CodecError, WIRE_VERSION};
pub use envelope::{Envelope, EnvelopePayload};
pub use membership::MembershipMessage;
pub use pbft::{
    CheckpointMsg, Commit, NewView, PbftMessage, PeerCheckpoint, PeerPrepare, PeerViewChange,
    PrePrepare, Prepare, PreparedProof, ViewChange,
};
