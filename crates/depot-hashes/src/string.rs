use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::error::{HashError, Result};
use crate::hasher::MultiHasher;
use crate::kind::HashKind;

/// A single typed checksum, e.g. `SHA256:e3b0c442…`.
///
/// The value is lowercase hex for digest kinds and a decimal byte count
/// for [`HashKind::FileSize`]. Comparison is case-insensitive on the value.
#[derive(Debug, Clone, Eq)]
pub struct HashString {
    kind: HashKind,
    value: String,
}

impl HashString {
    pub fn new(kind: HashKind, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        match kind.hex_len() {
            Some(len) => {
                if value.len() != len || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(HashError::MalformedValue(value));
                }
            }
            None => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(HashError::MalformedValue(value));
                }
            }
        }
        Ok(Self { kind, value })
    }

    /// Parse either `Type:value` or a bare hex string whose kind is
    /// guessed from its length.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((kind, value)) = s.split_once(':') {
            return Self::new(kind.parse()?, value.trim());
        }
        let kind = HashKind::from_hex_len(s.len())
            .ok_or_else(|| HashError::MalformedValue(s.to_string()))?;
        Self::new(kind, s)
    }

    /// Hash `path` with this string's algorithm and compare.
    pub fn verify_file(&self, path: &Path) -> Result<bool> {
        let mut hasher = MultiHasher::from_mask(self.kind.mask_bit());
        hasher.add_file(&mut File::open(path)?, None)?;
        Ok(hasher.result().find(self.kind).map(|h| h == self) == Some(true))
    }

    pub fn from_file(kind: HashKind, path: &Path) -> Result<Self> {
        let mut hasher = MultiHasher::from_mask(kind.mask_bit());
        hasher.add_file(&mut File::open(path)?, None)?;
        hasher
            .result()
            .find(kind)
            .cloned()
            .ok_or_else(|| HashError::UnknownKind(kind.to_string()))
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for HashString {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl fmt::Display for HashString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl FromStr for HashString {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// An ordered set of checksums with at most one entry per algorithm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashStringList {
    entries: Vec<HashString>,
}

impl HashStringList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry of the same kind.
    pub fn push(&mut self, hash: HashString) {
        match self.entries.iter_mut().find(|h| h.kind() == hash.kind()) {
            Some(slot) => *slot = hash,
            None => self.entries.push(hash),
        }
    }

    pub fn find(&self, kind: HashKind) -> Option<&HashString> {
        self.entries.iter().find(|h| h.kind() == kind)
    }

    /// The strongest digest present, skipping the size pseudo-hash.
    pub fn best(&self) -> Option<&HashString> {
        for kind in HashKind::ALL {
            if kind == HashKind::FileSize {
                continue;
            }
            if let Some(h) = self.find(kind) {
                return Some(h);
            }
        }
        None
    }

    pub fn file_size(&self) -> Option<u64> {
        self.find(HashKind::FileSize)
            .and_then(|h| h.value().parse().ok())
    }

    pub fn set_file_size(&mut self, size: u64) {
        // size strings are always well-formed decimals
        if let Ok(h) = HashString::new(HashKind::FileSize, size.to_string()) {
            self.push(h);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HashString> {
        self.entries.iter()
    }

    /// True iff the list carries at least one digest that is not on the
    /// weak list. A bare file size never qualifies; `force` names one
    /// algorithm blessed by configuration regardless of weakness.
    pub fn usable(&self, force: Option<HashKind>) -> bool {
        self.entries.iter().any(|h| {
            if h.kind() == HashKind::FileSize {
                return false;
            }
            !h.kind().is_weak() || force == Some(h.kind())
        })
    }

    /// Lists match when every algorithm present in both agrees and at
    /// least one digest (not just the size) is shared.
    pub fn matches(&self, other: &HashStringList) -> bool {
        let mut shared_digest = false;
        for ours in &self.entries {
            let Some(theirs) = other.find(ours.kind()) else {
                continue;
            };
            if ours != theirs {
                return false;
            }
            if ours.kind() != HashKind::FileSize {
                shared_digest = true;
            }
        }
        shared_digest
    }

    /// Hash the file with every algorithm present here and compare.
    pub fn verify_file(&self, path: &Path) -> Result<bool> {
        let mut hasher = MultiHasher::for_list(self);
        hasher.add_file(&mut File::open(path)?, None)?;
        Ok(self.matches(&hasher.result()))
    }
}

impl FromIterator<HashString> for HashStringList {
    fn from_iter<I: IntoIterator<Item = HashString>>(iter: I) -> Self {
        let mut list = Self::new();
        for hash in iter {
            list.push(hash);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn parses_typed_and_bare() {
        let typed = HashString::parse(&format!("SHA256:{EMPTY_SHA256}")).unwrap();
        assert_eq!(typed.kind(), HashKind::Sha256);

        let bare = HashString::parse(EMPTY_MD5).unwrap();
        assert_eq!(bare.kind(), HashKind::Md5);
    }

    #[test]
    fn rejects_malformed() {
        assert!(HashString::parse("SHA256:abcd").is_err());
        assert!(HashString::parse("zz").is_err());
        assert!(HashString::new(HashKind::FileSize, "12a").is_err());
    }

    #[test]
    fn equality_ignores_hex_case() {
        let lower = HashString::parse(EMPTY_MD5).unwrap();
        let upper = HashString::parse(&EMPTY_MD5.to_uppercase()).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn push_replaces_same_kind() {
        let mut list = HashStringList::new();
        list.set_file_size(1);
        list.set_file_size(2);
        assert_eq!(list.len(), 1);
        assert_eq!(list.file_size(), Some(2));
    }

    #[test]
    fn best_prefers_strongest() {
        let mut list = HashStringList::new();
        list.push(HashString::parse(EMPTY_MD5).unwrap());
        list.push(HashString::parse(EMPTY_SHA256).unwrap());
        assert_eq!(list.best().unwrap().kind(), HashKind::Sha256);
    }

    #[test]
    fn usable_needs_a_strong_digest() {
        let mut weak = HashStringList::new();
        weak.push(HashString::parse(EMPTY_MD5).unwrap());
        weak.set_file_size(0);
        assert!(!weak.usable(None));
        assert!(weak.usable(Some(HashKind::Md5)));

        let mut strong = weak.clone();
        strong.push(HashString::parse(EMPTY_SHA256).unwrap());
        assert!(strong.usable(None));
    }

    #[test]
    fn matches_requires_shared_digest() {
        let mut size_only = HashStringList::new();
        size_only.set_file_size(0);

        let mut full = HashStringList::new();
        full.set_file_size(0);
        full.push(HashString::parse(EMPTY_SHA256).unwrap());

        assert!(!size_only.matches(&full));
        assert!(full.matches(&full.clone()));

        let mut disagrees = full.clone();
        disagrees.push(
            HashString::parse("ef537f25c895bfa782526529a9b63d97aa631564d5d789c2b765448c8635fb6c")
                .unwrap(),
        );
        assert!(!full.matches(&disagrees));
    }
}
