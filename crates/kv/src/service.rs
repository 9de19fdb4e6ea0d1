//! Sequential execution of ordered operations.

use crate::{MemStorage, StorageResult};
use parking_lot::Mutex;
use quorumkv_pbft::{ExecutedOp, Service};
use quorumkv_types::{
    DatabaseMsg, DatabaseOperation, DatabaseResponse, ErrorToken, Hash, Request, RequestKind,
    ResponsePayload,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Execution bookkeeping, guarded by one coarse lock so the replica's
/// synchronous calls and the runner's apply path never interleave.
#[derive(Debug, Default)]
struct ExecState {
    /// The next sequence to execute. Everything below has executed.
    cursor: u64,
    /// Committed operations waiting for their predecessors.
    buffered: BTreeMap<u64, (Hash, Request)>,
    /// State hashes recorded at checkpoint boundaries.
    state_hashes: BTreeMap<u64, Hash>,
    /// Retained snapshots at checkpoint boundaries, served to lagging
    /// replicas until consolidated away.
    snapshots: BTreeMap<u64, Vec<u8>>,
}

/// The key-value service behind the replication engine.
///
/// Executes committed operations against [`MemStorage`] strictly in
/// sequence order, records a state hash and snapshot at every checkpoint
/// boundary, and installs snapshots received via state transfer.
pub struct KvService {
    storage: MemStorage,
    /// Snapshot cadence; matches the replica's checkpoint interval.
    checkpoint_interval: u64,
    exec: Mutex<ExecState>,
}

impl KvService {
    pub fn new(checkpoint_interval: u64) -> Self {
        Self {
            storage: MemStorage::new(),
            checkpoint_interval,
            exec: Mutex::new(ExecState { cursor: 1, ..Default::default() }),
        }
    }

    pub fn storage(&self) -> &MemStorage {
        &self.storage
    }

    /// The highest sequence executed so far.
    pub fn executed_up_to(&self) -> u64 {
        self.exec.lock().cursor - 1
    }

    fn execute(&self, request: &Request) -> Option<DatabaseResponse> {
        match &request.kind {
            RequestKind::Database(msg) => Some(self.execute_database(msg)),
            // NEW-CONFIG and NULL requests advance the cursor without
            // touching the store.
            RequestKind::NewConfig(_) | RequestKind::Null => None,
        }
    }

    fn execute_database(&self, msg: &DatabaseMsg) -> DatabaseResponse {
        let header = msg.header.clone();
        let db = &header.db_uuid;

        if db.is_empty() {
            return DatabaseResponse::error(header, ErrorToken::InvalidArguments);
        }

        let result = match &msg.operation {
            DatabaseOperation::Create { key, value } => {
                if key.is_empty() {
                    Err(ErrorToken::InvalidArguments)
                } else {
                    storage_result(self.storage.create(db, key, value)).map(|_| ResponsePayload::Ack)
                }
            }
            DatabaseOperation::Read { key } => match self.storage.has_db(db) {
                false => Err(ErrorToken::DatabaseNotFound),
                true => match self.storage.read(db, key) {
                    Some(value) => Ok(ResponsePayload::Value(value)),
                    None => Err(ErrorToken::RecordNotFound),
                },
            },
            DatabaseOperation::Update { key, value } => {
                storage_result(self.storage.update(db, key, value)).map(|_| ResponsePayload::Ack)
            }
            DatabaseOperation::Delete { key } => {
                storage_result(self.storage.remove(db, key)).map(|_| ResponsePayload::Ack)
            }
            DatabaseOperation::Has { key } => match self.storage.has(db, key) {
                Some(found) => Ok(ResponsePayload::Has(found)),
                None => Err(ErrorToken::DatabaseNotFound),
            },
            DatabaseOperation::Keys => match self.storage.get_keys(db) {
                Some(keys) => Ok(ResponsePayload::Keys(keys)),
                None => Err(ErrorToken::DatabaseNotFound),
            },
            DatabaseOperation::Size => match self.storage.get_size(db) {
                Some((keys, bytes)) => {
                    Ok(ResponsePayload::Size { keys: keys as u64, bytes: bytes as u64 })
                }
                None => Err(ErrorToken::DatabaseNotFound),
            },
            DatabaseOperation::CreateDb => {
                storage_result(self.storage.create_db(db)).map(|_| ResponsePayload::Ack)
            }
            DatabaseOperation::DeleteDb => {
                storage_result(self.storage.delete_db(db)).map(|_| ResponsePayload::Ack)
            }
            DatabaseOperation::HasDb => Ok(ResponsePayload::Has(self.storage.has_db(db))),
        };

        DatabaseResponse { header, result }
    }
}

/// Map a storage outcome onto the client-facing error tokens.
fn storage_result(result: StorageResult) -> Result<(), ErrorToken> {
    match result {
        StorageResult::Ok => Ok(()),
        StorageResult::Exists => Err(ErrorToken::RecordExists),
        StorageResult::NotFound => Err(ErrorToken::RecordNotFound),
        StorageResult::DbNotFound => Err(ErrorToken::DatabaseNotFound),
        StorageResult::KeyTooLarge => Err(ErrorToken::KeySizeTooLarge),
        StorageResult::ValueTooLarge => Err(ErrorToken::ValueSizeTooLarge),
    }
}

impl Service for KvService {
    fn apply(&self, sequence: u64, digest: Hash, request: Request) -> Vec<ExecutedOp> {
        let mut exec = self.exec.lock();

        if sequence < exec.cursor {
            debug!(sequence, cursor = exec.cursor, "ignoring already-executed operation");
            return vec![];
        }
        exec.buffered.insert(sequence, (digest, request));

        let mut executed = Vec::new();
        loop {
            let cursor = exec.cursor;
            let Some((digest, request)) = exec.buffered.remove(&cursor) else { break };

            let response = self.execute(&request);
            debug!(sequence = cursor, kind = request.kind_name(), "executed operation");
            executed.push(ExecutedOp { sequence: cursor, digest, response });
            exec.cursor = cursor + 1;

            if cursor % self.checkpoint_interval == 0 {
                let snapshot = self.storage.serialize();
                let hash = Hash::digest(&snapshot);
                exec.state_hashes.insert(cursor, hash);
                exec.snapshots.insert(cursor, snapshot);
            }
        }
        executed
    }

    fn state_hash(&self, sequence: u64) -> Hash {
        let exec = self.exec.lock();
        match exec.state_hashes.get(&sequence) {
            Some(hash) => *hash,
            None => {
                warn!(sequence, "no state hash recorded at this sequence");
                Hash::ZERO
            }
        }
    }

    fn snapshot(&self, sequence: u64) -> Option<Vec<u8>> {
        self.exec.lock().snapshots.get(&sequence).cloned()
    }

    fn install_snapshot(&self, sequence: u64, state_hash: Hash, data: &[u8]) -> bool {
        if Hash::digest(data) != state_hash {
            warn!(sequence, "snapshot bytes do not match the claimed state hash");
            return false;
        }
        if !self.storage.deserialize_into(data) {
            warn!(sequence, "snapshot bytes do not decode");
            return false;
        }

        let mut exec = self.exec.lock();
        exec.cursor = sequence + 1;
        exec.buffered = exec.buffered.split_off(&(sequence + 1));
        exec.state_hashes.insert(sequence, state_hash);
        exec.snapshots.insert(sequence, data.to_vec());
        info!(sequence, "installed snapshot; execution resumes after it");
        true
    }

    fn consolidate_log(&self, sequence: u64) {
        let mut exec = self.exec.lock();
        // Keep the entry at `sequence` itself: it backs the stable
        // checkpoint and may be served to lagging replicas.
        exec.state_hashes = exec.state_hashes.split_off(&sequence);
        exec.snapshots = exec.snapshots.split_off(&sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_types::DatabaseHeader;

    fn create_request(sequence: u64, key: &str) -> (Hash, Request) {
        let request = Request::database(
            "client",
            sequence,
            DatabaseMsg {
                header: DatabaseHeader { db_uuid: "db".into(), nonce: sequence },
                operation: DatabaseOperation::Create {
                    key: key.to_string(),
                    value: b"v".to_vec(),
                },
            },
        );
        (request.digest(), request)
    }

    fn create_db_request(sequence: u64) -> (Hash, Request) {
        let request = Request::database(
            "client",
            sequence,
            DatabaseMsg {
                header: DatabaseHeader { db_uuid: "db".into(), nonce: sequence },
                operation: DatabaseOperation::CreateDb,
            },
        );
        (request.digest(), request)
    }

    #[test]
    fn gaps_are_buffered_until_filled() {
        let service = KvService::new(100);
        let (d1, r1) = create_db_request(1);
        let (d2, r2) = create_request(2, "a");
        let (d3, r3) = create_request(3, "b");

        // Sequence 3 then 2 arrive before 1: nothing executes.
        assert!(service.apply(3, d3, r3).is_empty());
        assert!(service.apply(2, d2, r2).is_empty());
        assert_eq!(service.executed_up_to(), 0);

        // Sequence 1 unblocks the whole run, in order.
        let executed = service.apply(1, d1, r1);
        let sequences: Vec<u64> = executed.iter().map(|op| op.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(service.executed_up_to(), 3);
        assert_eq!(service.storage().read("db", "a"), Some(b"v".to_vec()));
    }

    #[test]
    fn replayed_operations_are_ignored() {
        let service = KvService::new(100);
        let (d1, r1) = create_db_request(1);
        assert_eq!(service.apply(1, d1, r1.clone()).len(), 1);
        assert!(service.apply(1, d1, r1).is_empty());
    }

    #[test]
    fn null_requests_advance_the_cursor_without_a_response() {
        let service = KvService::new(100);
        let null = Request::null();
        let executed = service.apply(1, null.digest(), null);
        assert_eq!(executed.len(), 1);
        assert!(executed[0].response.is_none());
        assert_eq!(service.executed_up_to(), 1);
    }

    #[test]
    fn state_hash_recorded_at_checkpoint_boundaries() {
        let service = KvService::new(2);
        let (d1, r1) = create_db_request(1);
        let (d2, r2) = create_request(2, "a");
        service.apply(1, d1, r1);
        service.apply(2, d2, r2);

        let hash = service.state_hash(2);
        assert_ne!(hash, Hash::ZERO);
        assert_eq!(hash, Hash::digest(&service.snapshot(2).unwrap()));
        // No checkpoint at sequence 1.
        assert_eq!(service.state_hash(1), Hash::ZERO);
    }

    #[test]
    fn snapshot_install_fast_forwards_a_fresh_service() {
        let source = KvService::new(2);
        let (d1, r1) = create_db_request(1);
        let (d2, r2) = create_request(2, "a");
        source.apply(1, d1, r1);
        source.apply(2, d2, r2);
        let snapshot = source.snapshot(2).unwrap();
        let hash = source.state_hash(2);

        let target = KvService::new(2);
        assert!(target.install_snapshot(2, hash, &snapshot));
        assert_eq!(target.executed_up_to(), 2);
        assert_eq!(target.state_hash(2), hash);
        assert_eq!(target.storage().read("db", "a"), Some(b"v".to_vec()));

        // Tampered bytes are refused.
        let fresh = KvService::new(2);
        assert!(!fresh.install_snapshot(2, Hash::digest(b"other"), &snapshot));
    }

    #[test]
    fn consolidate_keeps_the_stable_snapshot() {
        let service = KvService::new(1);
        let (d1, r1) = create_db_request(1);
        let (d2, r2) = create_request(2, "a");
        service.apply(1, d1, r1);
        service.apply(2, d2, r2);

        service.consolidate_log(2);
        assert!(service.snapshot(1).is_none());
        assert!(service.snapshot(2).is_some());
    }

    #[test]
    fn crud_error_tokens() {
        let service = KvService::new(100);
        let header = DatabaseHeader { db_uuid: "db".into(), nonce: 0 };

        let read_missing_db = service.execute_database(&DatabaseMsg {
            header: header.clone(),
            operation: DatabaseOperation::Read { key: "k".into() },
        });
        assert_eq!(read_missing_db.result, Err(ErrorToken::DatabaseNotFound));

        service.storage().create_db("db");
        service.storage().create("db", "k", b"v");

        let create_dup = service.execute_database(&DatabaseMsg {
            header: header.clone(),
            operation: DatabaseOperation::Create { key: "k".into(), value: b"v".to_vec() },
        });
        assert_eq!(create_dup.result, Err(ErrorToken::RecordExists));

        let read_missing = service.execute_database(&DatabaseMsg {
            header: header.clone(),
            operation: DatabaseOperation::Read { key: "missing".into() },
        });
        assert_eq!(read_missing.result, Err(ErrorToken::RecordNotFound));

        let empty_key = service.execute_database(&DatabaseMsg {
            header,
            operation: DatabaseOperation::Create { key: String::new(), value: vec![] },
        });
        assert_eq!(empty_key.result, Err(ErrorToken::InvalidArguments));
    }
}
