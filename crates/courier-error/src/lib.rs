use thiserror::Error;

pub type CourierResult<T> = Result<T, CourierError>;

/// Crate-wide error type
///
/// Groups failures by the class that decides how they propagate: transport
/// failures surface to the caller, processing failures feed the retry router,
/// dead-letter failures need operator attention.
#[derive(Error, Debug)]
pub enum CourierError {
    // ===== Transport & Broker Errors =====
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),

    // ===== Storage Errors =====
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ===== Delivery Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Dead-letter write failed: {0}")]
    DeadLetter(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutting down")]
    Shutdown,

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// How urgently an error needs a human
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected during normal operation (business failure, shutdown)
    Routine,
    /// Degraded but self-healing (transport hiccup)
    Degraded,
    /// Data may be stuck or lost without intervention
    OperatorAttention,
}

impl CourierError {
    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            CourierError::Broker(_) => "BROKER_ERROR",
            CourierError::Unavailable(_) => "BROKER_UNAVAILABLE",
            CourierError::Json(_) => "JSON_ERROR",
            CourierError::Malformed(_) => "MALFORMED_RECORD",
            CourierError::Redis(_) => "REDIS_ERROR",
            CourierError::Validation(_) => "VALIDATION_ERROR",
            CourierError::Processing(_) => "PROCESSING_ERROR",
            CourierError::DeadLetter(_) => "DEAD_LETTER_ERROR",
            CourierError::TransactionAborted(_) => "TRANSACTION_ABORTED",
            CourierError::Config(_) => "CONFIG_ERROR",
            CourierError::Shutdown => "SHUTDOWN",
            CourierError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CourierError::Processing(_)
            | CourierError::Validation(_)
            | CourierError::TransactionAborted(_)
            | CourierError::Shutdown => Severity::Routine,
            CourierError::Broker(_) | CourierError::Unavailable(_) | CourierError::Redis(_) => {
                Severity::Degraded
            }
            CourierError::DeadLetter(_)
            | CourierError::Malformed(_)
            | CourierError::Json(_)
            | CourierError::Config(_)
            | CourierError::Unknown(_) => Severity::OperatorAttention,
        }
    }

    /// Transport-class errors may succeed if the same operation is repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CourierError::Broker(_) | CourierError::Unavailable(_) | CourierError::Redis(_)
        )
    }

    /// Log this error with a level matching its severity
    pub fn log(&self) {
        let code = self.error_code();
        match self.severity() {
            Severity::OperatorAttention => {
                tracing::error!(error = %self, error_code = %code, "Operator attention required")
            }
            Severity::Degraded => {
                tracing::warn!(error = %self, error_code = %code, "Degraded operation")
            }
            Severity::Routine => {
                tracing::debug!(error = %self, error_code = %code, "Routine failure")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CourierError::Broker("x".into()).error_code(), "BROKER_ERROR");
        assert_eq!(CourierError::Shutdown.error_code(), "SHUTDOWN");
    }

    #[test]
    fn test_severity_classes() {
        assert_eq!(
            CourierError::Processing("boom".into()).severity(),
            Severity::Routine
        );
        assert_eq!(
            CourierError::Unavailable("circuit open".into()).severity(),
            Severity::Degraded
        );
        assert_eq!(
            CourierError::DeadLetter("dlt down".into()).severity(),
            Severity::OperatorAttention
        );
    }

    #[test]
    fn test_transient_only_for_transport() {
        assert!(CourierError::Broker("timeout".into()).is_transient());
        assert!(!CourierError::Processing("bad".into()).is_transient());
        assert!(!CourierError::Malformed("garbage".into()).is_transient());
    }

    #[test]
    fn test_json_conversion() {
        let err: CourierError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CourierError::Json(_)));
    }
}
