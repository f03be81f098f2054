// ============================================================================
// Logging Configuration
// ============================================================================

use anyhow::{Result, bail};

use crate::env::string_or;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info,courier=debug"
    pub rust_log: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rust_log: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let format = match string_or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("LOG_FORMAT must be 'pretty' or 'json', got {:?}", other),
        };

        Ok(Self {
            rust_log: string_or("RUST_LOG", "info"),
            format,
        })
    }
}
