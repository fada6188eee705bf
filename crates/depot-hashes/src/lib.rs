//! Streaming checksum primitives for repository metadata.
//!
//! Every index file and downloaded archive is described by a set of
//! checksums, one per algorithm, plus the file size as a pseudo-hash.
//! This crate provides incremental hashers for the supported algorithms,
//! a [`MultiHasher`] that feeds an enabled subset in one pass, and the
//! [`HashString`]/[`HashStringList`] types used to carry expected and
//! computed values through fetchers and writers.
//!
//! # Example
//!
//! ```
//! use depot_hashes::{HashKind, MultiHasher};
//!
//! let mut hasher = MultiHasher::new();
//! hasher.add(b"hello ");
//! hasher.add(b"world");
//! let list = hasher.result();
//! assert!(list.find(HashKind::Sha256).is_some());
//! assert_eq!(list.file_size(), Some(11));
//! ```

pub use self::error::{HashError, Result};
pub use self::hasher::MultiHasher;
pub use self::kind::HashKind;
pub use self::string::{HashString, HashStringList};

mod error;
mod hasher;
mod kind;
mod string;
