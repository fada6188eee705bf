//! Repository index generation: walk a tree of package and source
//! files, reuse per-file work through a content-hash cache, and emit
//! `Packages`, `Sources`, `Contents` and `Release` indices through the
//! shared codec layer.

pub use self::cachedb::{CacheDb, StatRecord, Tag};
pub use self::contents::ContentsWriter;
pub use self::debfile::DebFile;
pub use self::error::{ArchiveError, Result};
pub use self::multicompress::{CompressReport, MultiCompress};
pub use self::overrides::{OverrideItem, OverrideTable};
pub use self::packages::{PackagesWriter, TranslationWriter, PACKAGE_ORDER};
pub use self::release::{by_hash_path, delete_all_but_most_recent, ReleaseWriter};
pub use self::sources::{SourcesWriter, SOURCE_ORDER};
pub use self::walker::walk_tree;

mod cachedb;
mod contents;
mod debfile;
mod error;
mod multicompress;
mod overrides;
mod packages;
mod release;
mod sources;
mod walker;
