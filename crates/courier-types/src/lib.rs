// ============================================================================
// Courier Types - Core Data Types
// ============================================================================
//
// Data structures shared by the publisher, the consumer workers and the
// dead-letter tooling. No broker, config or runtime dependencies.
//
// Contents:
// - OrderPlacedEvent (the record exchanged over the log)
// - DeliveryAttempt (retry bookkeeping owned by the retry router)
// - DeliveryReceipt (broker acknowledgment of a publish)
// - DeadLetterRecord / MalformedRecord (terminal failure records)
//
// ============================================================================

pub mod attempt;
pub mod dead_letter;
pub mod event;
pub mod receipt;

pub use attempt::DeliveryAttempt;
pub use dead_letter::{DeadLetterRecord, MalformedRecord};
pub use event::{FAILURE_SENTINEL, OrderPlacedEvent};
pub use receipt::{DeliveryReceipt, TopicPartition};
