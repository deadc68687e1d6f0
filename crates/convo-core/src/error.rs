use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("malformed item id: {0}")]
    InvalidItemId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConvoError>;
