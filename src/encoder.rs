//! Binary frame encoding.
//!
//! Each record becomes one length-prefixed frame:
//!
//! ```text
//! u32 BE  body length
//! u8      severity code
//! u64 BE  wall-clock timestamp, milliseconds since the Unix epoch
//! u16 BE  tag length, then the tag bytes (UTF-8)
//! u32 BE  payload length, then the payload bytes
//! ```
//!
//! Text payloads are raw UTF-8; structured payloads are a MessagePack map.
//! Encoding is deterministic and has no side effects; the only failure mode
//! is a record that cannot fit the configured frame size limit.

use std::time::UNIX_EPOCH;

use serde::Serialize;
use thiserror::Error;

use crate::record::{LogRecord, Payload};

/// Errors produced while encoding a record.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoded frame body would exceed the configured limit.
    #[error("encoded record is {size} bytes, limit is {limit}")]
    Oversize { size: usize, limit: usize },
    /// The source tag does not fit its u16 length prefix.
    #[error("source tag is {0} bytes, limit is 65535")]
    TagTooLong(usize),
    /// Structured payload failed to serialise.
    #[error(transparent)]
    Fields(#[from] rmp_serde::encode::Error),
}

/// One encoded frame, length prefix included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame(Vec<u8>);

impl EncodedFrame {
    /// Full frame bytes as written to the wire.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Total frame length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Stateless record encoder bound to a frame size limit.
#[derive(Clone, Debug)]
pub struct Encoder {
    max_frame_size: usize,
}

impl Encoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Encode a record into a wire frame.
    pub fn encode(&self, record: &LogRecord) -> Result<EncodedFrame, EncodeError> {
        let payload = payload_bytes(&record.payload)?;
        let tag = record.tag.as_bytes();
        let tag_len =
            u16::try_from(tag.len()).map_err(|_| EncodeError::TagTooLong(tag.len()))?;

        let body_len = 1 + 8 + 2 + tag.len() + 4 + payload.len();
        if body_len > self.max_frame_size {
            return Err(EncodeError::Oversize {
                size: body_len,
                limit: self.max_frame_size,
            });
        }
        // max_frame_size is validated to fit u32 at build time.
        let prefix = body_len as u32;

        let timestamp_ms = record
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or_default();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend(prefix.to_be_bytes());
        buf.push(record.severity.code());
        buf.extend(timestamp_ms.to_be_bytes());
        buf.extend(tag_len.to_be_bytes());
        buf.extend_from_slice(tag);
        buf.extend((payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(EncodedFrame(buf))
    }
}

fn payload_bytes(payload: &Payload) -> Result<Vec<u8>, EncodeError> {
    match payload {
        Payload::Text(text) => Ok(text.as_bytes().to_vec()),
        Payload::Fields(fields) => {
            let mut buf = Vec::with_capacity(64);
            fields.serialize(&mut rmp_serde::Serializer::new(&mut buf))?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::level::Severity;

    fn encoder() -> Encoder {
        Encoder::new(1 << 20)
    }

    #[test]
    fn frame_layout_matches_wire_format() {
        let record = LogRecord::new(Severity::Warning, "net", "lost packet");
        let frame = encoder().encode(&record).expect("encode record");
        let bytes = frame.bytes();

        let body_len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, bytes.len() - 4);
        assert_eq!(bytes[4], Severity::Warning.code());

        let tag_len = u16::from_be_bytes(bytes[13..15].try_into().unwrap()) as usize;
        assert_eq!(&bytes[15..15 + tag_len], b"net");

        let payload_start = 15 + tag_len + 4;
        assert_eq!(&bytes[payload_start..], b"lost packet");
    }

    #[test]
    fn timestamp_is_epoch_millis() {
        let record = LogRecord::new(Severity::Info, "t", "x");
        let expected = record
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let frame = encoder().encode(&record).expect("encode record");
        let wire = u64::from_be_bytes(frame.bytes()[5..13].try_into().unwrap());
        assert_eq!(wire, expected);
    }

    #[test]
    fn structured_payload_is_messagepack_map() {
        let mut fields = BTreeMap::new();
        fields.insert("user".to_owned(), "abc".to_owned());
        let record = LogRecord::new(Severity::Info, "session", fields.clone());
        let frame = encoder().encode(&record).expect("encode record");

        let bytes = frame.bytes();
        let tag_len = u16::from_be_bytes(bytes[13..15].try_into().unwrap()) as usize;
        let payload = &bytes[15 + tag_len + 4..];
        let decoded: BTreeMap<String, String> =
            rmp_serde::from_slice(payload).expect("decode payload");
        assert_eq!(decoded, fields);
    }

    #[test]
    fn rejects_oversized_payload() {
        let record = LogRecord::new(Severity::Info, "big", "x".repeat(64));
        let err = Encoder::new(32).encode(&record).expect_err("must reject");
        assert!(matches!(err, EncodeError::Oversize { limit: 32, .. }));
    }

    #[test]
    fn encoding_is_deterministic() {
        let record = LogRecord::new(Severity::Error, "core", "boom");
        let a = encoder().encode(&record).expect("encode");
        let b = encoder().encode(&record).expect("encode");
        assert_eq!(a, b);
    }
}
