//! Retry tiers, backoff and the failure state machine

mod metadata;
mod policy;
mod router;
mod topics;

pub use metadata::RetryMetadata;
pub use policy::BackoffPolicy;
pub use router::{transition, AttemptOutcome, AttemptState, RetryDecision, RetryRouter};
pub use topics::{dead_letter_topic, retry_topic, TopicSet};
