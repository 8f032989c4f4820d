use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid vector dimension: expected {expected}, got {got}")]
    InvalidVectorDimension { expected: usize, got: usize },

    #[error("similarity index unavailable")]
    IndexUnavailable,

    #[error("unknown embedding record: {0}")]
    UnknownRecord(uuid::Uuid),

    #[error("embedding record {0} already exists; records are immutable")]
    DuplicateRecord(uuid::Uuid),

    #[error("unknown encryption key reference: {0}")]
    UnknownKeyRef(String),

    #[error("vector decrypt failed for record {0}")]
    DecryptFailed(uuid::Uuid),

    #[error("vector encrypt failed: {0}")]
    EncryptFailed(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store row parse error: {0}")]
    Json(#[from] serde_json::Error),
}
