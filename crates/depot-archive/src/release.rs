use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use depot_hashes::{HashKind, HashString, MultiHasher};
use depot_util::{format_rfc1123, list_dir_filtered, Configuration};

use crate::error::Result;

/// Builds the signed-index manifest: metadata fields first, then one
/// checksum listing per enabled algorithm covering every index file,
/// with optional `by-hash` mirroring of the listed files.
pub struct ReleaseWriter {
    fields: Vec<(String, String)>,
    enabled: Vec<HashKind>,
    by_hash_keep: usize,
    files: Vec<IndexedFile>,
}

struct IndexedFile {
    relative: String,
    size: u64,
    hashes: depot_hashes::HashStringList,
}

impl ReleaseWriter {
    /// Field values and hash selection come from the `FTPArchive::Release`
    /// configuration subtree.
    pub fn from_config(config: &Configuration) -> ReleaseWriter {
        let mut fields = Vec::new();
        for name in [
            "Origin",
            "Label",
            "Suite",
            "Version",
            "Codename",
            "Architectures",
            "Components",
            "Description",
        ] {
            if let Some(value) = config.find_opt(&format!("FTPArchive::Release::{name}")) {
                fields.push((name.to_string(), value));
            }
        }
        fields.push(("Date".to_string(), format_rfc1123(Utc::now())));
        if config.find_bool("FTPArchive::Release::Acquire-By-Hash", false) {
            fields.push(("Acquire-By-Hash".to_string(), "yes".to_string()));
        }

        let mut enabled = Vec::new();
        for kind in [
            HashKind::Md5,
            HashKind::Sha1,
            HashKind::Sha256,
            HashKind::Sha512,
        ] {
            let key = format!("FTPArchive::Release::{}", release_flag_name(kind));
            if config.find_bool(&key, true) {
                enabled.push(kind);
            }
        }

        ReleaseWriter {
            fields,
            enabled,
            by_hash_keep: config.find_int("FTPArchive::By-Hash-Keep", 3).max(1) as usize,
            files: Vec::new(),
        }
    }

    /// Hash one produced index file under its path relative to the
    /// release root.
    pub fn add_file(&mut self, root: &Path, relative: &str) -> Result<()> {
        let path = root.join(relative);
        let mut hasher = MultiHasher::new();
        hasher.add_file(&mut std::fs::File::open(&path)?, None)?;
        let hashes = hasher.result();
        self.files.push(IndexedFile {
            relative: relative.to_string(),
            size: hashes.file_size().unwrap_or(0),
            hashes,
        });
        Ok(())
    }

    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        for (name, value) in &self.fields {
            writeln!(out, "{name}: {value}")?;
        }
        for kind in &self.enabled {
            writeln!(out, "{}:", release_section_name(*kind))?;
            for file in &self.files {
                if let Some(hash) = file.hashes.find(*kind) {
                    writeln!(out, " {} {:>16} {}", hash.value(), file.size, file.relative)?;
                }
            }
        }
        Ok(())
    }

    /// Mirror every listed file under
    /// `<dir>/by-hash/<Algo>/<hex>`, then trim each by-hash directory
    /// to the newest entries by mtime.
    pub fn link_by_hash(&self, root: &Path) -> Result<()> {
        for file in &self.files {
            for kind in &self.enabled {
                let Some(hash) = file.hashes.find(*kind) else {
                    continue;
                };
                let source = root.join(&file.relative);
                let target = by_hash_path(&source, hash);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if !target.exists() {
                    if std::fs::hard_link(&source, &target).is_err() {
                        std::fs::copy(&source, &target)?;
                    }
                }
            }
        }
        // retention pass per hash directory
        let mut dirs: Vec<PathBuf> = Vec::new();
        for file in &self.files {
            for kind in &self.enabled {
                if file.hashes.find(*kind).is_none() {
                    continue;
                }
                let dir = root
                    .join(&file.relative)
                    .parent()
                    .map(|p| p.join("by-hash").join(kind.as_str()))
                    .unwrap_or_default();
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        for dir in dirs {
            delete_all_but_most_recent(&dir, self.by_hash_keep)?;
        }
        Ok(())
    }
}

fn release_flag_name(kind: HashKind) -> &'static str {
    match kind {
        HashKind::Md5 => "MD5",
        HashKind::Sha1 => "SHA1",
        HashKind::Sha256 => "SHA256",
        HashKind::Sha512 => "SHA512",
        HashKind::FileSize => "FileSize",
    }
}

fn release_section_name(kind: HashKind) -> &'static str {
    match kind {
        HashKind::Md5 => "MD5Sum",
        _ => kind.as_str(),
    }
}

/// `dists/x/binary-amd64/Packages` + SHA256 →
/// `dists/x/binary-amd64/by-hash/SHA256/<hex>`.
pub fn by_hash_path(file: &Path, hash: &HashString) -> PathBuf {
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    dir.join("by-hash")
        .join(hash.kind().as_str())
        .join(hash.value())
}

/// Keep the newest `keep` files (mtime, nanosecond precision) and
/// remove the rest.
pub fn delete_all_but_most_recent(dir: &Path, keep: usize) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut files = list_dir_filtered(dir, &[])?;
    files.sort_by_key(|path| {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    let excess = files.len().saturating_sub(keep);
    for path in files.into_iter().take(excess) {
        tracing::debug!(path = %path.display(), "pruning old by-hash file");
        std::fs::remove_file(&path)?;
    }
    Ok(())
}
