use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("unterminated quote or bracket group")]
    UnterminatedGroup,

    #[error("malformed date: {0}")]
    MalformedDate(String),

    #[error("invalid configuration item: {0}")]
    InvalidConfigItem(String),

    #[error("cannot list directory {path}")]
    ListDir {
        path: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, UtilError>;
