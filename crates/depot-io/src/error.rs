use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("read failed")]
    ReadError(#[source] io::Error),

    #[error("write failed")]
    WriteError(#[source] io::Error),

    #[error("unexpected end of file, expected {expected} more bytes")]
    UnexpectedEof { expected: usize },

    #[error("seek not supported on this stream")]
    SeekNotSupported,

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("cannot open {path}")]
    Open {
        path: PathBuf,
        source: io::Error,
    },

    #[error("handle is in failed state")]
    Failed,

    #[error("handle is closed")]
    Closed,

    #[error("external compressor {binary} exited with {status}")]
    CompressorExit { binary: String, status: i32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
