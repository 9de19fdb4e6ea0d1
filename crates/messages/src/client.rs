//! Client database request wrapping.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use borsh::{BorshDeserialize, BorshSerialize};
use quorumkv_types::DatabaseMsg;

use crate::codec::CodecError;

/// A client database request as it arrives off the wire: the operation is
/// base64-encoded inside the envelope. Undecodable payloads are answered
/// with the INVALID_CRUD error token.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ClientDatabaseRequest {
    /// Uuid of the submitting client, used for duplicate suppression.
    pub client: String,
    /// Client clock at submission, milliseconds since the epoch. Admission
    /// rejects requests outside the allowed skew window and uses the
    /// triple (timestamp, client, digest) for duplicate suppression.
    pub timestamp: u64,
    /// base64 of the canonical binary encoding of a [`DatabaseMsg`].
    pub payload: String,
}

impl ClientDatabaseRequest {
    /// Wrap a database operation for transport.
    pub fn wrap(client: impl Into<String>, timestamp: u64, msg: &DatabaseMsg) -> Self {
        let encoded = borsh::to_vec(msg).expect("database message serialization cannot fail");
        Self {
            client: client.into(),
            timestamp,
            payload: BASE64.encode(encoded),
        }
    }

    /// Unwrap back into the database operation.
    pub fn unwrap_msg(&self) -> Result<DatabaseMsg, CodecError> {
        let bytes = BASE64
            .decode(&self.payload)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        DatabaseMsg::try_from_slice(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_types::{DatabaseHeader, DatabaseOperation};

    #[test]
    fn wrap_unwrap_round_trip() {
        let msg = DatabaseMsg {
            header: DatabaseHeader { db_uuid: "db".into(), nonce: 1 },
            operation: DatabaseOperation::Read { key: "k".into() },
        };
        let wrapped = ClientDatabaseRequest::wrap("client-1", 1000, &msg);
        assert_eq!(wrapped.unwrap_msg().unwrap(), msg);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let bad = ClientDatabaseRequest {
            client: "c".into(),
            timestamp: 0,
            payload: "not base64!!".into(),
        };
        assert!(bad.unwrap_msg().is_err());

        let wrong_bytes = ClientDatabaseRequest {
            client: "c".into(),
            timestamp: 0,
            payload: BASE64.encode(b"junk"),
        };
        assert!(wrong_bytes.unwrap_msg().is_err());
    }
}
