//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][payload: borsh-encoded Envelope]
//! ```
//!
//! - Version is currently `1`
//! - The payload is the canonical length-prefixed binary encoding of an
//!   [`Envelope`]; hashes elsewhere in the protocol are computed over the
//!   same canonical form.

use crate::Envelope;
use borsh::BorshDeserialize;
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("message too short")]
    MessageTooShort,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),
}

/// Encode an envelope to wire format.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let payload = borsh::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))?;
    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

/// Decode an envelope from wire format.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }

    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }

    Envelope::try_from_slice(&data[1..]).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnvelopePayload, PbftMessage, Prepare};
    use quorumkv_types::{Hash, NodeId};

    fn sample_envelope() -> Envelope {
        Envelope::new(
            NodeId::from("peer-1"),
            EnvelopePayload::Consensus(PbftMessage::Prepare(Prepare {
                view: 1,
                sequence: 19,
                digest: Hash::digest(b"request"),
                request: None,
            })),
        )
    }

    #[test]
    fn round_trip() {
        let envelope = sample_envelope();
        let bytes = encode_envelope(&envelope).unwrap();
        assert_eq!(bytes[0], WIRE_VERSION);
        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode_envelope(&sample_envelope()).unwrap();
        bytes[0] = 99;
        assert!(matches!(decode_envelope(&bytes), Err(CodecError::UnknownVersion(99))));
    }

    #[test]
    fn rejects_empty_and_truncated_input() {
        assert!(matches!(decode_envelope(&[]), Err(CodecError::MessageTooShort)));

        let bytes = encode_envelope(&sample_envelope()).unwrap();
        assert!(matches!(
            decode_envelope(&bytes[..bytes.len() / 2]),
            Err(CodecError::Decode(_))
        ));
    }
}
