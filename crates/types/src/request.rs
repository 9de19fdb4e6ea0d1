//! Client request payloads.

use crate::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered client request.
///
/// Every slot in the replicated log holds exactly one request. Requests are
/// identified by a content fingerprint over the canonical binary encoding,
/// which is what PRE-PREPARE/PREPARE/COMMIT messages agree on.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Request {
    /// Client identifier (uuid of the submitting client).
    pub client: String,
    /// Client-supplied timestamp, milliseconds since the epoch. Used for
    /// the admission age window and duplicate suppression.
    pub timestamp: u64,
    pub kind: RequestKind,
}

/// The payload variants a request can carry.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RequestKind {
    /// A key-value operation to execute against the replicated store.
    Database(DatabaseMsg),
    /// A proposed next membership configuration (canonical JSON form),
    /// ordered through the log like any other request.
    NewConfig(String),
    /// A no-op filling a log slot so the service sees contiguous
    /// sequence numbers.
    Null,
}

impl Request {
    pub fn database(client: impl Into<String>, timestamp: u64, msg: DatabaseMsg) -> Self {
        Self { client: client.into(), timestamp, kind: RequestKind::Database(msg) }
    }

    pub fn new_config(client: impl Into<String>, timestamp: u64, config_json: String) -> Self {
        Self { client: client.into(), timestamp, kind: RequestKind::NewConfig(config_json) }
    }

    /// A NULL request for a synthesized slot.
    pub fn null() -> Self {
        Self { client: String::new(), timestamp: 0, kind: RequestKind::Null }
    }

    /// Content fingerprint over the canonical binary encoding.
    pub fn digest(&self) -> Hash {
        let encoded = borsh::to_vec(self).expect("request serialization cannot fail");
        Hash::digest(&encoded)
    }

    pub fn is_database(&self) -> bool {
        matches!(self.kind, RequestKind::Database(_))
    }

    pub fn is_new_config(&self) -> bool {
        matches!(self.kind, RequestKind::NewConfig(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            RequestKind::Database(_) => "database",
            RequestKind::NewConfig(_) => "new-config",
            RequestKind::Null => "null",
        }
    }
}

/// Header echoed back on every database response so the client can match
/// responses to requests.
#[derive(
    Debug, Clone, Default, PartialEq, Eq,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct DatabaseHeader {
    /// The namespaced database this request targets.
    pub db_uuid: String,
    /// Client-chosen correlation nonce.
    pub nonce: u64,
}

/// One key-value operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DatabaseMsg {
    pub header: DatabaseHeader,
    pub operation: DatabaseOperation,
}

/// The CRUD operation set over namespaced databases.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum DatabaseOperation {
    Create { key: String, value: Vec<u8> },
    Read { key: String },
    Update { key: String, value: Vec<u8> },
    Delete { key: String },
    Has { key: String },
    Keys,
    Size,
    CreateDb,
    DeleteDb,
    HasDb,
}

impl DatabaseOperation {
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseOperation::Create { .. } => "create",
            DatabaseOperation::Read { .. } => "read",
            DatabaseOperation::Update { .. } => "update",
            DatabaseOperation::Delete { .. } => "delete",
            DatabaseOperation::Has { .. } => "has",
            DatabaseOperation::Keys => "keys",
            DatabaseOperation::Size => "size",
            DatabaseOperation::CreateDb => "create-db",
            DatabaseOperation::DeleteDb => "delete-db",
            DatabaseOperation::HasDb => "has-db",
        }
    }
}

/// Error tokens surfaced to clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum ErrorToken {
    RecordExists,
    RecordNotFound,
    DatabaseNotFound,
    ValueSizeTooLarge,
    KeySizeTooLarge,
    InvalidCrud,
    ElectionInProgress,
    InvalidArguments,
}

impl ErrorToken {
    /// The wire token string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorToken::RecordExists => "RECORD_EXISTS",
            ErrorToken::RecordNotFound => "RECORD_NOT_FOUND",
            ErrorToken::DatabaseNotFound => "DATABASE_NOT_FOUND",
            ErrorToken::ValueSizeTooLarge => "VALUE_SIZE_TOO_LARGE",
            ErrorToken::KeySizeTooLarge => "KEY_SIZE_TOO_LARGE",
            ErrorToken::InvalidCrud => "INVALID_CRUD",
            ErrorToken::ElectionInProgress => "ELECTION_IN_PROGRESS",
            ErrorToken::InvalidArguments => "INVALID_ARGUMENTS",
        }
    }
}

impl fmt::Display for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful response payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Bare acknowledgement (writes, admission ack).
    Ack,
    /// A read value.
    Value(Vec<u8>),
    /// Key listing.
    Keys(Vec<String>),
    /// (key count, total value bytes).
    Size { keys: u64, bytes: u64 },
    /// Existence check result.
    Has(bool),
}

/// Response returned to a client session.
///
/// Responses travel back over the client's own connection, outside the
/// replica-to-replica wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseResponse {
    pub header: DatabaseHeader,
    pub result: Result<ResponsePayload, ErrorToken>,
}

impl DatabaseResponse {
    pub fn ok(header: DatabaseHeader, payload: ResponsePayload) -> Self {
        Self { header, result: Ok(payload) }
    }

    pub fn error(header: DatabaseHeader, token: ErrorToken) -> Self {
        Self { header, result: Err(token) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_msg() -> DatabaseMsg {
        DatabaseMsg {
            header: DatabaseHeader { db_uuid: "db".into(), nonce: 7 },
            operation: DatabaseOperation::Create { key: "k".into(), value: b"v".to_vec() },
        }
    }

    #[test]
    fn digest_is_stable_and_content_addressed() {
        let a = Request::database("client", 1000, sample_msg());
        let b = Request::database("client", 1000, sample_msg());
        assert_eq!(a.digest(), b.digest());

        let c = Request::database("client", 1001, sample_msg());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn null_requests_have_a_fixed_digest() {
        assert_eq!(Request::null().digest(), Request::null().digest());
    }

    #[test]
    fn error_tokens_match_the_wire_strings() {
        assert_eq!(ErrorToken::RecordExists.as_str(), "RECORD_EXISTS");
        assert_eq!(ErrorToken::InvalidCrud.as_str(), "INVALID_CRUD");
        assert_eq!(ErrorToken::ElectionInProgress.as_str(), "ELECTION_IN_PROGRESS");
    }
}
