use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status value that makes payment processing fail on purpose.
///
/// Compared case-insensitively. Used to exercise the retry and dead-letter
/// paths end to end.
pub const FAILURE_SENTINEL: &str = "FAIL";

/// An order placed by a customer.
///
/// Serialized as JSON with camelCase field names. `amount` is a fixed-point
/// decimal and is encoded as a string so no float rounding can occur on the
/// wire. `order_id` is the partition key: every event for the same order lands
/// on the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacedEvent {
    #[serde(default)]
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub status: String,
}

impl OrderPlacedEvent {
    pub fn new(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: Decimal,
        status: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            amount,
            status: status.into(),
        }
    }

    /// Assign a random order id if the caller did not provide one.
    ///
    /// Returns the (possibly freshly generated) id.
    pub fn ensure_order_id(&mut self) -> &str {
        if self.order_id.trim().is_empty() {
            self.order_id = uuid::Uuid::new_v4().to_string();
        }
        &self.order_id
    }

    pub fn has_order_id(&self) -> bool {
        !self.order_id.trim().is_empty()
    }

    /// Whether this event carries the simulated-failure status.
    pub fn is_failure_sentinel(&self) -> bool {
        self.status.eq_ignore_ascii_case(FAILURE_SENTINEL)
    }
}
