//! Recursive discovery of repository indices under a mount point.
//!
//! A disc may expose the same tree several times through symlinked
//! release names (`stable` → `sid`); duplicates are recognized by
//! hashing the head of each index file, so every distinct index counts
//! exactly once no matter how many paths lead to it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use depot_hashes::MultiHasher;

#[derive(Debug, thiserror::Error)]
pub enum CdromError {
    #[error("cannot scan {path}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CdromError>;

/// What a scan of one mount point found, each list sorted.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// directories holding a `Packages` index
    pub packages: Vec<PathBuf>,
    /// directories holding a `Sources` index
    pub sources: Vec<PathBuf>,
    /// directories holding `Translation-*` files
    pub translations: Vec<PathBuf>,
    /// directories holding `Release` files
    pub releases: Vec<PathBuf>,
    /// the `.disk` info directory when present
    pub info_dir: Option<PathBuf>,
}

const MAX_DEPTH: usize = 12;
/// Only the head of each index participates in duplicate detection;
/// identical trees reached via different names hash the same.
const DEDUP_HEAD: u64 = 1024 * 1024;

fn head_digest(path: &Path) -> Option<String> {
    let mut hasher = MultiHasher::from_mask(depot_hashes::HashKind::Md5.mask_bit());
    let mut file = std::fs::File::open(path).ok()?;
    hasher.add_file(&mut file, Some(DEDUP_HEAD)).ok()?;
    hasher
        .result()
        .find(depot_hashes::HashKind::Md5)
        .map(|h| h.value().to_string())
}

fn is_index(name: &str, stem: &str) -> bool {
    name == stem
        || (name.starts_with(stem)
            && name[stem.len()..].starts_with('.'))
}

/// Walk `mount` and collect every directory that carries repository
/// indices. Unreadable directories are skipped with a warning; any
/// other I/O failure aborts the scan.
pub fn scan(mount: &Path) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut seen = HashSet::new();
    descend(mount, 0, &mut result, &mut seen)?;

    result.packages.sort();
    result.sources.sort();
    result.translations.sort();
    result.releases.sort();
    Ok(result)
}

fn descend(
    dir: &Path,
    depth: usize,
    result: &mut ScanResult,
    seen: &mut HashSet<(&'static str, String)>,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Ok(());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::warn!(dir = %dir.display(), "permission denied, skipping");
            return Ok(());
        }
        Err(source) => {
            return Err(CdromError::Scan {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut subdirs = Vec::new();
    let mut found_here: Vec<(&'static str, PathBuf)> = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|source| CdromError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        if path.is_dir() {
            if name == ".disk" && result.info_dir.is_none() {
                result.info_dir = Some(path.clone());
            } else if !name.starts_with('.') {
                subdirs.push(path);
            }
            continue;
        }

        if is_index(&name, "Packages") {
            found_here.push(("packages", path));
        } else if is_index(&name, "Sources") {
            found_here.push(("sources", path));
        } else if name.starts_with("Translation-") {
            found_here.push(("translations", path));
        } else if is_index(&name, "Release") || name == "InRelease" {
            found_here.push(("releases", path));
        }
    }

    // one entry per kind per directory; the digest of the first found
    // file identifies the directory content for de-duplication
    let mut kinds_recorded: HashSet<&'static str> = HashSet::new();
    for (kind, file) in found_here {
        if kinds_recorded.contains(kind) {
            continue;
        }
        let Some(digest) = head_digest(&file) else {
            continue;
        };
        kinds_recorded.insert(kind);
        if !seen.insert((kind, digest)) {
            tracing::debug!(dir = %dir.display(), kind, "dropping duplicate index");
            continue;
        }
        let list = match kind {
            "packages" => &mut result.packages,
            "sources" => &mut result.sources,
            "translations" => &mut result.translations,
            _ => &mut result.releases,
        };
        list.push(dir.to_path_buf());
    }

    subdirs.sort();
    for subdir in subdirs {
        descend(&subdir, depth + 1, result, seen)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        let bin = root.join("dists/stable/main/binary-i386");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("Packages"), b"Package: a\n\n").unwrap();
        std::fs::write(bin.join("Packages.bz2"), b"compressed").unwrap();

        let src = root.join("dists/stable/main/source");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("Sources"), b"Source: a\n\n").unwrap();

        let i18n = root.join("dists/stable/main/i18n");
        std::fs::create_dir_all(&i18n).unwrap();
        std::fs::write(i18n.join("Translation-en"), b"Package: a\n").unwrap();

        std::fs::write(root.join("dists/stable/Release"), b"Suite: stable\n").unwrap();
        std::fs::create_dir_all(root.join(".disk")).unwrap();
    }

    #[test]
    fn finds_every_index_kind() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let result = scan(dir.path()).unwrap();
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.translations.len(), 1);
        assert_eq!(result.releases.len(), 1);
        assert!(result.packages[0].ends_with("binary-i386"));
        assert_eq!(result.info_dir.as_deref(), Some(dir.path().join(".disk")).as_deref());
    }

    #[test]
    fn symlinked_alias_counts_once() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        std::os::unix::fs::symlink(
            dir.path().join("dists/stable"),
            dir.path().join("dists/unstable"),
        )
        .unwrap();

        let result = scan(dir.path()).unwrap();
        assert_eq!(result.packages.len(), 1, "{:?}", result.packages);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.releases.len(), 1);
    }

    #[test]
    fn distinct_trees_count_separately() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let other = dir.path().join("dists/testing/main/binary-i386");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("Packages"), b"Package: b\n\n").unwrap();

        let result = scan(dir.path()).unwrap();
        assert_eq!(result.packages.len(), 2);
        // sorted output
        let mut sorted = result.packages.clone();
        sorted.sort();
        assert_eq!(result.packages, sorted);
    }

    #[test]
    fn missing_mount_is_fatal() {
        assert!(scan(Path::new("/nonexistent-mount-point")).is_err());
    }
}
