//! Buffered file handles layered over block compression codecs.
//!
//! [`BufFile`] offers one read/write/seek/size surface whether the
//! bytes live in a plain file, a gzip/bzip2/xz/lz4/zstd stream, or
//! behind an external compressor subprocess. Codec choice is explicit,
//! by trailing extension, or by probing the disk for the compressed
//! sibling that actually exists.
//!
//! Writers support staged placement: `atomic` writes a hidden temp
//! sibling renamed over the target on close, `replace` stages under
//! `path.new`. Either way a crashed or failed writer never leaves a
//! half-written target behind.

pub use self::buffile::{
    copy_file, file_mtime, set_file_mtime, BufFile, CompressMode, Mode, OpenOptions,
};
pub use self::error::{IoError, Result};
pub use self::registry::{CodecKind, Compressor, CompressorRegistry};

mod backend;
mod buffile;
mod codec;
mod error;
mod piped;
mod registry;
