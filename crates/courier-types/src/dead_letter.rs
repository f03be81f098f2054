use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::OrderPlacedEvent;

/// An event that failed processing on every attempt.
///
/// Written to `{source_topic}-dlt`. Carries enough to replay or diagnose the
/// event without access to the retry streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event: OrderPlacedEvent,
    /// The main topic the event was originally published to.
    pub source_topic: String,
    pub attempts_made: u32,
    pub timestamp: DateTime<Utc>,
    /// Last processing error message.
    #[serde(default)]
    pub failure_reason: String,
}

/// A record that could not be decoded at the consume boundary.
///
/// Never retried: it goes straight to the dead-letter topic with its raw
/// payload so it can be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    /// Payload as lossy UTF-8.
    pub raw_payload: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}
