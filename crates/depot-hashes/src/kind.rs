use std::fmt;
use std::str::FromStr;

use crate::error::HashError;

/// Supported checksum algorithms, plus the file size carried as a
/// pseudo-hash so size checks flow through the same verification path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    FileSize,
}

impl HashKind {
    /// All kinds in preference order, weakest last. `FileSize` sorts
    /// after every real digest.
    pub const ALL: [HashKind; 5] = [
        HashKind::Sha512,
        HashKind::Sha256,
        HashKind::Sha1,
        HashKind::Md5,
        HashKind::FileSize,
    ];

    /// The field name used in index files and wire messages.
    pub fn as_str(self) -> &'static str {
        match self {
            HashKind::Md5 => "MD5Sum",
            HashKind::Sha1 => "SHA1",
            HashKind::Sha256 => "SHA256",
            HashKind::Sha512 => "SHA512",
            HashKind::FileSize => "Checksum-FileSize",
        }
    }

    /// Length of the hex rendering, or `None` for the decimal size.
    pub fn hex_len(self) -> Option<usize> {
        match self {
            HashKind::Md5 => Some(32),
            HashKind::Sha1 => Some(40),
            HashKind::Sha256 => Some(64),
            HashKind::Sha512 => Some(128),
            HashKind::FileSize => None,
        }
    }

    /// Selection bit for [`MultiHasher::from_mask`](crate::MultiHasher::from_mask).
    pub fn mask_bit(self) -> u32 {
        match self {
            HashKind::Md5 => 1 << 0,
            HashKind::Sha1 => 1 << 1,
            HashKind::Sha256 => 1 << 2,
            HashKind::Sha512 => 1 << 3,
            HashKind::FileSize => 1 << 4,
        }
    }

    /// Broken or breakable digests never satisfy `usable()` on their own.
    pub fn is_weak(self) -> bool {
        matches!(self, HashKind::Md5 | HashKind::Sha1 | HashKind::FileSize)
    }

    /// Guess the kind from a bare hex string by its length.
    pub fn from_hex_len(len: usize) -> Option<HashKind> {
        match len {
            32 => Some(HashKind::Md5),
            40 => Some(HashKind::Sha1),
            64 => Some(HashKind::Sha256),
            128 => Some(HashKind::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MD5Sum" => Ok(HashKind::Md5),
            "SHA1" => Ok(HashKind::Sha1),
            "SHA256" => Ok(HashKind::Sha256),
            "SHA512" => Ok(HashKind::Sha512),
            "Checksum-FileSize" => Ok(HashKind::FileSize),
            _ => Err(HashError::UnknownKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_names() {
        for kind in HashKind::ALL {
            assert_eq!(kind.as_str().parse::<HashKind>().unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("CRC32".parse::<HashKind>().is_err());
    }

    #[test]
    fn guesses_from_length() {
        assert_eq!(HashKind::from_hex_len(32), Some(HashKind::Md5));
        assert_eq!(HashKind::from_hex_len(64), Some(HashKind::Sha256));
        assert_eq!(HashKind::from_hex_len(63), None);
    }
}
