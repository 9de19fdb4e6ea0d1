//! The seam between the replication engine and the application service.

use quorumkv_types::{DatabaseResponse, Hash, Request};

/// One operation the service actually executed.
#[derive(Debug, Clone)]
pub struct ExecutedOp {
    pub sequence: u64,
    pub digest: Hash,
    /// The client-facing result, present for database operations.
    pub response: Option<DatabaseResponse>,
}

/// The application state machine executing ordered operations.
///
/// The replica hands every committed operation to the service via
/// `apply`; commits can arrive out of sequence order, and the service is
/// responsible for buffering gaps and executing strictly sequentially.
/// The other methods serve the checkpoint protocol: state hashes at
/// checkpoint boundaries, full-state snapshots for transfer to lagging
/// replicas, and log consolidation once a checkpoint is stable.
///
/// Implementations are shared between the replica and the runner, so they
/// guard their interior state themselves.
pub trait Service: Send + Sync {
    /// Accept the committed operation at `sequence`.
    ///
    /// Returns every operation executed as a consequence, in execution
    /// order: nothing if `sequence` is ahead of the execution cursor, or a
    /// run of operations if this one filled the gap in front of buffered
    /// successors.
    fn apply(&self, sequence: u64, digest: Hash, request: Request) -> Vec<ExecutedOp>;

    /// Hash of the service state after executing `sequence`. Only
    /// meaningful at checkpoint boundaries the service has reached.
    fn state_hash(&self, sequence: u64) -> Hash;

    /// Serialized snapshot of the full service state at `sequence`, if the
    /// service still holds one.
    fn snapshot(&self, sequence: u64) -> Option<Vec<u8>>;

    /// Install a snapshot received via state transfer. Returns false if
    /// the data does not decode or does not match `state_hash`; the
    /// execution cursor jumps past `sequence` on success.
    fn install_snapshot(&self, sequence: u64, state_hash: Hash, data: &[u8]) -> bool;

    /// Discard execution bookkeeping at or below `sequence` (the new
    /// stable checkpoint).
    fn consolidate_log(&self, sequence: u64);
}
