use std::io;

/// The failure taxonomy fetchers report upstream. The scheduler may
/// retry anything [`AcquireError::is_transient`] says yes to.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("connection to {0} timed out")]
    ConnectionTimedOut(String),

    #[error("could not resolve {host}")]
    ResolveFailure { host: String, transient: bool },

    #[error("redirection loop encountered")]
    RedirectLoop,

    #[error("redirection to {0} is forbidden")]
    RedirectForbidden(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("maximum size of {0} bytes exceeded")]
    MaximumSizeExceeded(u64),

    #[error("SOCKS proxy failure: {0}")]
    Socks(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error(transparent)]
    File(#[from] depot_io::IoError),

    #[error(transparent)]
    Hash(#[from] depot_hashes::HashError),

    #[error("{0}")]
    Other(String),
}

impl AcquireError {
    /// Whether the parent scheduler may retry this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            AcquireError::Timeout(_)
            | AcquireError::ConnectionRefused(_)
            | AcquireError::ConnectionTimedOut(_)
            | AcquireError::Protocol(_) => true,
            AcquireError::ResolveFailure { transient, .. } => *transient,
            AcquireError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// The short `FailReason` token reported in `URI Failure` messages.
    pub fn fail_reason(&self) -> &'static str {
        match self {
            AcquireError::Timeout(_) => "Timeout",
            AcquireError::ConnectionRefused(_) => "ConnectionRefused",
            AcquireError::ConnectionTimedOut(_) => "ConnectionTimedOut",
            AcquireError::ResolveFailure { transient: true, .. } => "TmpResolveFailure",
            AcquireError::ResolveFailure { transient: false, .. } => "ResolveFailure",
            AcquireError::RedirectLoop | AcquireError::RedirectForbidden(_) => "Redirect",
            AcquireError::HashMismatch { .. } => "HashSumMismatch",
            AcquireError::SignatureInvalid(_) => "GPGFailure",
            AcquireError::NotFound(_) => "NotFound",
            AcquireError::MaximumSizeExceeded(_) => "MaximumSizeExceeded",
            AcquireError::Socks(_) => "SOCKS",
            _ => "Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AcquireError>;
