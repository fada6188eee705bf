use std::io;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("unknown hash type: {0}")]
    UnknownKind(String),

    #[error("malformed hash value: {0}")]
    MalformedValue(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, HashError>;
