use thiserror::Error;

/// Main error type for the supervision daemon
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alert delivery failed: {0}")]
    AlertDelivery(String),

    // Process errors
    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Signal delivery failed for pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    // External collaborator errors
    #[error("Service manager error: {0}")]
    ServiceManager(String),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    // State machine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Build a timeout error for an external operation
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        WardenError::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
