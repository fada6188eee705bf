//! Tagged-record (`Field: value` paragraph) parsing and serialization.
//!
//! Every metadata file the toolkit reads or writes (package indices,
//! source indices, release files, the method wire messages) uses this
//! grammar: fields at the start of a line, continuation lines indented,
//! paragraphs separated by a blank line.

pub use self::error::{Result, TagError};
pub use self::file::TagFile;
pub use self::section::{Rewrite, RewriteOp, Scanned, TagSection};

mod error;
mod file;
mod section;
