use std::path::Path;

use depot_hashes::{HashKind, HashString, HashStringList, MultiHasher};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Bump when the record layout changes: old databases are refused and
/// rebuilt, never migrated in place.
const FORMAT_VERSION: &[u8] = b"2";
const FORMAT_KEY: &[u8] = b"\0format";

/// Which hash fields of a [`StatRecord`] hold valid values.
const FLAG_MD5: u32 = 1 << 0;
const FLAG_SHA1: u32 = 1 << 1;
const FLAG_SHA256: u32 = 1 << 2;
const FLAG_SHA512: u32 = 1 << 3;

/// The per-file stat row: identity via mtime+size, plus every digest
/// computed the last time the file was read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatRecord {
    flags: u32,
    pub mtime: i64,
    pub size: u64,
    md5: Vec<u8>,
    sha1: Vec<u8>,
    sha256: Vec<u8>,
    sha512: Vec<u8>,
}

impl StatRecord {
    pub fn from_hashes(mtime: i64, size: u64, hashes: &HashStringList) -> StatRecord {
        let mut record = StatRecord {
            mtime,
            size,
            ..StatRecord::default()
        };
        for (kind, flag) in FIELDS {
            let Some(hash) = hashes.find(kind) else {
                continue;
            };
            let Ok(bytes) = hex::decode(hash.value()) else {
                continue;
            };
            *record.field_mut(kind) = bytes;
            record.flags |= flag;
        }
        record
    }

    fn field_mut(&mut self, kind: HashKind) -> &mut Vec<u8> {
        match kind {
            HashKind::Md5 => &mut self.md5,
            HashKind::Sha1 => &mut self.sha1,
            HashKind::Sha256 => &mut self.sha256,
            _ => &mut self.sha512,
        }
    }

    fn field(&self, kind: HashKind) -> &Vec<u8> {
        match kind {
            HashKind::Md5 => &self.md5,
            HashKind::Sha1 => &self.sha1,
            HashKind::Sha256 => &self.sha256,
            _ => &self.sha512,
        }
    }

    pub fn hashes(&self) -> HashStringList {
        let mut list = HashStringList::new();
        for (kind, flag) in FIELDS {
            if self.flags & flag == 0 {
                continue;
            }
            if let Ok(hash) = HashString::new(kind, hex::encode(self.field(kind))) {
                list.push(hash);
            }
        }
        list.set_file_size(self.size);
        list
    }
}

const FIELDS: [(HashKind, u32); 4] = [
    (HashKind::Md5, FLAG_MD5),
    (HashKind::Sha1, FLAG_SHA1),
    (HashKind::Sha256, FLAG_SHA256),
    (HashKind::Sha512, FLAG_SHA512),
];

/// Value tag per cached aspect of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// stat + hashes
    Stat,
    /// the raw control paragraph
    Control,
    /// the contents listing
    Contents,
    /// the source control (dsc) text
    Source,
}

impl Tag {
    fn suffix(self) -> &'static [u8] {
        match self {
            Tag::Stat => b":st",
            Tag::Control => b":cl",
            Tag::Contents => b":cn",
            Tag::Source => b":cs",
        }
    }
}

/// Content-hash cache keyed by `(file path, tag)`, so regenerating an
/// unchanged archive tree never re-reads the package files.
pub struct CacheDb {
    tree: sled::Db,
    hits: u64,
    misses: u64,
}

impl CacheDb {
    pub fn open(path: &Path) -> Result<CacheDb> {
        let tree = sled::open(path)?;
        match tree.get(FORMAT_KEY)? {
            None => {
                tree.insert(FORMAT_KEY, FORMAT_VERSION)?;
            }
            Some(version) if version == FORMAT_VERSION => {}
            Some(_) => {
                return Err(ArchiveError::CacheFormat {
                    path: path.to_path_buf(),
                })
            }
        }
        Ok(CacheDb {
            tree,
            hits: 0,
            misses: 0,
        })
    }

    fn key(path: &Path, tag: Tag) -> Vec<u8> {
        let mut key = path.as_os_str().as_encoded_bytes().to_vec();
        key.extend_from_slice(tag.suffix());
        key
    }

    pub fn get_stat(&mut self, path: &Path) -> Result<Option<StatRecord>> {
        match self.tree.get(Self::key(path, Tag::Stat))? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_stat(&mut self, path: &Path, record: &StatRecord) -> Result<()> {
        self.tree
            .insert(Self::key(path, Tag::Stat), postcard::to_stdvec(record)?)?;
        Ok(())
    }

    pub fn get_blob(&mut self, path: &Path, tag: Tag) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(Self::key(path, tag))?.map(|v| v.to_vec()))
    }

    pub fn put_blob(&mut self, path: &Path, tag: Tag, blob: &[u8]) -> Result<()> {
        self.tree.insert(Self::key(path, tag), blob)?;
        Ok(())
    }

    /// Hashes for `path`, reusing the cached row when mtime and size
    /// still match and every wanted digest is present.
    pub fn hashes_for(&mut self, path: &Path) -> Result<HashStringList> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if let Some(record) = self.get_stat(path)? {
            if record.mtime == mtime && record.size == meta.len() {
                let hashes = record.hashes();
                if hashes.find(HashKind::Sha256).is_some() {
                    self.hits += 1;
                    return Ok(hashes);
                }
            }
        }

        self.misses += 1;
        let mut hasher = MultiHasher::new();
        hasher.add_file(&mut std::fs::File::open(path)?, None)?;
        let hashes = hasher.result();
        self.put_stat(path, &StatRecord::from_hashes(mtime, meta.len(), &hashes))?;
        Ok(hashes)
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_hashes_by_mtime_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pkg.deb");
        std::fs::write(&file, b"archive bytes").unwrap();

        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();
        let first = db.hashes_for(&file).unwrap();
        let second = db.hashes_for(&file).unwrap();
        assert_eq!(first, second);
        let (hits, misses) = db.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn size_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pkg.deb");
        std::fs::write(&file, b"one").unwrap();

        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();
        let first = db.hashes_for(&file).unwrap();
        std::fs::write(&file, b"different").unwrap();
        let second = db.hashes_for(&file).unwrap();
        assert_ne!(first, second);
        assert_eq!(db.stats().0, 0);
    }

    #[test]
    fn stat_record_round_trips() {
        let mut hasher = MultiHasher::new();
        hasher.add(b"x");
        let hashes = hasher.result();
        let record = StatRecord::from_hashes(12345, 1, &hashes);
        let back = record.hashes();
        assert_eq!(back, hashes);
    }

    #[test]
    fn foreign_format_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let tree = sled::open(&path).unwrap();
            tree.insert(FORMAT_KEY, b"1").unwrap();
            tree.flush().unwrap();
        }
        assert!(matches!(
            CacheDb::open(&path),
            Err(ArchiveError::CacheFormat { .. })
        ));
    }
}
