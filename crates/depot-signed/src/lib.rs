//! Clearsigned-file handling and detached signature verification.
//!
//! The splitter turns a PGP clearsigned message into its payload (with
//! dash escapes undone) and the concatenated armored signature blocks,
//! in one streaming pass. Verification then drives an external
//! `sqv`-compatible verifier against a discovered set of keyrings and
//! yields the accepted signer fingerprints.

pub use self::error::{Result, SignedError};
pub use self::split::{
    open_maybe_clearsigned, read_payload, split_clearsigned, starts_with_clearsign_marker,
    verify_detached_signature_file,
};
pub use self::verify::{verify_clearsigned, verify_detached, KeyringOptions, Signers};

mod error;
mod split;
mod verify;
