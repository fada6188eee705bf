use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cache database {path} has an incompatible format")]
    CacheFormat { path: PathBuf },

    #[error("cache database failure: {0}")]
    Cache(#[from] sled::Error),

    #[error("record serialization failed: {0}")]
    Record(#[from] postcard::Error),

    #[error("{path} is not an ar archive")]
    NotAnArchive { path: PathBuf },

    #[error("{path} carries no control member")]
    NoControlMember { path: PathBuf },

    #[error("malformed override line {line} in {path}")]
    MalformedOverride { path: PathBuf, line: usize },

    #[error("required field {field} missing in {path}")]
    MissingField { path: PathBuf, field: &'static str },

    #[error(transparent)]
    Tag(#[from] depot_tagfile::TagError),

    #[error(transparent)]
    Signed(#[from] depot_signed::SignedError),

    #[error(transparent)]
    File(#[from] depot_io::IoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] depot_hashes::HashError),

    #[error(transparent)]
    Util(#[from] depot_util::UtilError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
