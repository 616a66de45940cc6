//! Log record representation for the shipping sink.
//!
//! A `LogRecord` captures one event together with the timestamps needed on
//! the wire (wall clock) and for latency accounting (monotonic). Records are
//! immutable once constructed.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Instant, SystemTime};

use crate::level::Severity;

/// Body of a log record: free-form text or a structured attribute map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Plain UTF-8 message.
    Text(String),
    /// Key/value attributes, kept sorted for deterministic encoding.
    Fields(BTreeMap<String, String>),
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<BTreeMap<String, String>> for Payload {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Payload::Fields(fields)
    }
}

/// One immutable log event.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Wall-clock time the record was created; written to the wire.
    pub timestamp: SystemTime,
    /// Monotonic creation time, unaffected by clock adjustments.
    pub created: Instant,
    /// Record severity.
    pub severity: Severity,
    /// Short source tag identifying the emitter.
    pub tag: String,
    /// Record body.
    pub payload: Payload,
}

impl LogRecord {
    /// Construct a record, capturing both clocks from the current context.
    pub fn new(severity: Severity, tag: &str, payload: impl Into<Payload>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            created: Instant::now(),
            severity,
            tag: tag.to_owned(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Text(text) => write!(f, "{} [{}] {}", self.severity, self.tag, text),
            Payload::Fields(fields) => {
                write!(f, "{} [{}] {} fields", self.severity, self.tag, fields.len())
            }
        }
    }
}
