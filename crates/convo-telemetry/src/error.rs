use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event payload error: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
