//! Errors for the parking tracker
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid spot id: {0}")]
    InvalidSpotId(String),

    #[error("Invalid spot status: {0}")]
    InvalidSpotStatus(String),

    #[error("Malformed uplink: {0}")]
    MalformedUplink(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Parking lot already exists: {0}")]
    LotExists(String),

    #[error("Invalid parking lot: {0}")]
    InvalidLot(String),

    #[error("Reconciliation failed during {operation}: {origin}")]
    ReconciliationFailed {
        operation: &'static str,
        origin: String,
    },

    #[error("Database connection error: {0}")]
    DatabaseConnectionError(String),

    #[error("Database migration error: {0}")]
    MigrationError(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),
}

impl TrackerError {
    /// Wrap a store failure raised inside a reconciler transaction
    pub fn reconciliation(operation: &'static str, origin: impl std::fmt::Display) -> Self {
        Self::ReconciliationFailed {
            operation,
            origin: origin.to_string(),
        }
    }
}
