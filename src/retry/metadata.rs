use chrono::{DateTime, Utc};
use tracing::warn;

use super::topics::TopicSet;
use crate::broker::{headers, InboundRecord};

/// Retry bookkeeping carried by a consumed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryMetadata {
    /// 0 for the original delivery
    pub attempt: u32,
    pub original_topic: String,
    /// Coordinates of the first delivery, stable across retries
    pub origin: String,
    pub due_at: Option<DateTime<Utc>>,
}

impl RetryMetadata {
    /// Read the retry headers of `record`.
    ///
    /// A record without headers is an original delivery. If the attempt
    /// header is missing or unreadable on a retry tier, the tier index is
    /// used, since tier `n` only ever carries attempt `n`.
    pub fn from_record(record: &InboundRecord, topics: &TopicSet) -> Self {
        let tier = topics.tier_of(&record.topic).unwrap_or(0);

        let attempt = match record.header(headers::ATTEMPT) {
            Some(raw) => raw.parse::<u32>().unwrap_or_else(|_| {
                warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    header = %raw,
                    "Unreadable attempt header, using tier index"
                );
                tier
            }),
            None => tier,
        };

        let due_at = record
            .header(headers::DUE_AT)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Self {
            attempt,
            original_topic: record
                .header(headers::ORIGINAL_TOPIC)
                .unwrap_or(topics.main())
                .to_string(),
            origin: record
                .header(headers::ORIGIN)
                .map(str::to_string)
                .unwrap_or_else(|| record.coordinates()),
            due_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Headers;

    fn inbound(topic: &str, headers: Headers) -> InboundRecord {
        InboundRecord {
            topic: topic.to_string(),
            partition: 2,
            offset: 41,
            key: Some("o1".to_string()),
            payload: Some(b"{}".to_vec()),
            headers,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_original_delivery() {
        let topics = TopicSet::new("orders", 4);
        let meta = RetryMetadata::from_record(&inbound("orders", Headers::new()), &topics);
        assert_eq!(meta.attempt, 0);
        assert_eq!(meta.original_topic, "orders");
        assert_eq!(meta.origin, "orders:2:41");
        assert!(meta.due_at.is_none());
    }

    #[test]
    fn test_retry_headers_are_read() {
        let topics = TopicSet::new("orders", 4);
        let mut map = Headers::new();
        map.insert(headers::ATTEMPT.to_string(), "2".to_string());
        map.insert(headers::ORIGINAL_TOPIC.to_string(), "orders".to_string());
        map.insert(headers::ORIGIN.to_string(), "orders:0:7".to_string());
        map.insert(headers::DUE_AT.to_string(), "1700000000000".to_string());

        let meta = RetryMetadata::from_record(&inbound("orders-retry-2", map), &topics);
        assert_eq!(meta.attempt, 2);
        assert_eq!(meta.origin, "orders:0:7");
        assert_eq!(meta.due_at.map(|t| t.timestamp_millis()), Some(1_700_000_000_000));
    }

    #[test]
    fn test_garbled_attempt_falls_back_to_tier() {
        let topics = TopicSet::new("orders", 4);
        let mut map = Headers::new();
        map.insert(headers::ATTEMPT.to_string(), "two".to_string());

        let meta = RetryMetadata::from_record(&inbound("orders-retry-3", map), &topics);
        assert_eq!(meta.attempt, 3);
    }
}
