use async_trait::async_trait;
use courier_types::OrderPlacedEvent;
use tracing::{info, warn};

use crate::worker::{EventProcessor, ProcessingError, RecordMeta};

pub const PAYMENT_FAILURE_MESSAGE: &str = "Payment processing failed internally!";

/// Payment step of the order pipeline.
///
/// Orders whose status is the `FAIL` sentinel always fail, which drives them
/// through every retry tier into the dead-letter topic.
#[derive(Debug, Default)]
pub struct PaymentProcessor;

#[async_trait]
impl EventProcessor for PaymentProcessor {
    async fn process(
        &self,
        event: &OrderPlacedEvent,
        meta: &RecordMeta,
    ) -> Result<(), ProcessingError> {
        info!(
            order_id = %event.order_id,
            customer_id = %event.customer_id,
            amount = %event.amount,
            attempt = meta.attempt,
            "Processing payment"
        );

        if event.is_failure_sentinel() {
            warn!(order_id = %event.order_id, attempt = meta.attempt, "Payment failed");
            return Err(ProcessingError::new(PAYMENT_FAILURE_MESSAGE));
        }
        Ok(())
    }
}
