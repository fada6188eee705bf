use std::io::Read;

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::Result;
use crate::kind::HashKind;
use crate::string::{HashString, HashStringList};

/// Feeds one byte stream to the enabled subset of digests in a single
/// pass. The total byte count is always tracked and reported as a
/// `Checksum-FileSize` entry.
pub struct MultiHasher {
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    sha512: Option<Sha512>,
    consumed: u64,
}

impl MultiHasher {
    /// Enable every supported digest.
    pub fn new() -> Self {
        Self::from_mask(u32::MAX)
    }

    /// Enable the digests whose [`HashKind::mask_bit`] is set in `mask`.
    pub fn from_mask(mask: u32) -> Self {
        let on = |kind: HashKind| mask & kind.mask_bit() != 0;
        Self {
            md5: on(HashKind::Md5).then(Md5::new),
            sha1: on(HashKind::Sha1).then(Sha1::new),
            sha256: on(HashKind::Sha256).then(Sha256::new),
            sha512: on(HashKind::Sha512).then(Sha512::new),
            consumed: 0,
        }
    }

    /// Enable only the digests present in `list`. Size is tracked
    /// regardless, so a size-only list still verifies its one entry.
    pub fn for_list(list: &HashStringList) -> Self {
        let mask = list
            .iter()
            .map(|h| h.kind().mask_bit())
            .fold(0, |acc, bit| acc | bit);
        Self::from_mask(mask)
    }

    pub fn add(&mut self, data: &[u8]) {
        if let Some(h) = self.md5.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha512.as_mut() {
            h.update(data);
        }
        self.consumed += data.len() as u64;
    }

    /// Stream from the reader's current position, up to `limit` bytes
    /// when given. Returns the number of bytes consumed.
    pub fn add_file(&mut self, reader: &mut impl Read, limit: Option<u64>) -> Result<u64> {
        let mut buf = [0u8; 64 * 1024];
        let mut remaining = limit.unwrap_or(u64::MAX);
        let mut total = 0u64;
        while remaining > 0 {
            let want = buf.len().min(remaining.min(buf.len() as u64) as usize);
            let got = reader.read(&mut buf[..want])?;
            if got == 0 {
                break;
            }
            self.add(&buf[..got]);
            total += got as u64;
            remaining -= got as u64;
        }
        Ok(total)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Finalize every enabled digest and append the byte count.
    pub fn result(self) -> HashStringList {
        fn hex_entry(kind: HashKind, bytes: &[u8]) -> HashString {
            // hex of a fixed-width digest is always well-formed
            HashString::new(kind, hex::encode(bytes)).unwrap()
        }

        let mut list = HashStringList::new();
        if let Some(h) = self.md5 {
            list.push(hex_entry(HashKind::Md5, &h.finalize()));
        }
        if let Some(h) = self.sha1 {
            list.push(hex_entry(HashKind::Sha1, &h.finalize()));
        }
        if let Some(h) = self.sha256 {
            list.push(hex_entry(HashKind::Sha256, &h.finalize()));
        }
        if let Some(h) = self.sha512 {
            list.push(hex_entry(HashKind::Sha512, &h.finalize()));
        }
        list.set_file_size(self.consumed);
        list
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}
