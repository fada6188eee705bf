use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SignedError {
    #[error("clearsigned file {0} does not start with a signed message block")]
    MessageNotAtStart(PathBuf),

    #[error("clearsigned file {0} contains unexpected line starting with a dash (armor)")]
    UnexpectedDashInArmor(PathBuf),

    #[error("clearsigned file {0} contains unexpected line starting with a dash (msg)")]
    UnexpectedDashInMsg(PathBuf),

    #[error("clearsigned file {0} contains unexpected line starting with a dash (sig)")]
    UnexpectedDashInSig(PathBuf),

    #[error("clearsigned file {0} contains unsigned lines")]
    UnsignedTrailingLines(PathBuf),

    #[error("splitting of clearsigned file {0} failed as it doesn't contain all expected parts")]
    MissingParts(PathBuf),

    #[error("signature in file {0} wasn't closed")]
    SignatureNotClosed(PathBuf),

    #[error("signatures couldn't be verified because no keyring is specified")]
    NoKeyring,

    #[error("no good signature")]
    NoGoodSignature,

    #[error("no good signature from required signers: {0}")]
    RequiredSignerMissing(String),

    #[error("verifier {binary} returned {status}:\n{stderr}")]
    VerifierFailed {
        binary: String,
        status: i32,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    File(#[from] depot_io::IoError),
}

pub type Result<T> = std::result::Result<T, SignedError>;
