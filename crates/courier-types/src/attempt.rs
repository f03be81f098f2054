use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::OrderPlacedEvent;

/// One delivery attempt of an event inside a retry sequence.
///
/// `attempt_number` is 0 for the original delivery. The value never exceeds
/// `max_attempts`; an attempt is the last one when
/// `attempt_number + 1 == max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub event: OrderPlacedEvent,
    pub attempt_number: u32,
    pub max_attempts: u32,
    /// Delay before the next attempt, once computed by the backoff policy.
    #[serde(with = "duration_millis")]
    pub next_delay: Duration,
}

impl DeliveryAttempt {
    pub fn new(event: OrderPlacedEvent, attempt_number: u32, max_attempts: u32) -> Self {
        Self {
            event,
            attempt_number: attempt_number.min(max_attempts),
            max_attempts,
            next_delay: Duration::ZERO,
        }
    }

    pub fn first(event: OrderPlacedEvent, max_attempts: u32) -> Self {
        Self::new(event, 0, max_attempts)
    }

    pub fn is_final(&self) -> bool {
        self.attempt_number + 1 >= self.max_attempts
    }

    /// Attempts made once this one has run.
    pub fn attempts_made(&self) -> u32 {
        self.attempt_number + 1
    }

    /// The attempt that follows this one, carrying the computed delay.
    pub fn next(&self, delay: Duration) -> Self {
        Self {
            event: self.event.clone(),
            attempt_number: (self.attempt_number + 1).min(self.max_attempts),
            max_attempts: self.max_attempts,
            next_delay: delay,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
