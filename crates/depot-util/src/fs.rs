use std::path::{Path, PathBuf};

use crate::error::{Result, UtilError};

fn valid_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'~' | b'+'))
}

/// Sorted regular files in `dir` whose extension is in `extensions`
/// (every file when the list is empty). Oddly named entries are skipped
/// with a debug note, matching the tolerant reading of drop-in
/// directories like `trusted.d`.
pub fn list_dir_filtered(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| UtilError::ListDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| UtilError::ListDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !valid_entry_name(name) {
            tracing::debug!(?path, "skipping oddly named file");
            continue;
        }
        if !extensions.is_empty() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !extensions.contains(&ext) {
                continue;
            }
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// The scratch directory, honoring the usual environment overrides in
/// order. Falls back to `/tmp` when nothing usable is set.
pub fn temp_dir() -> PathBuf {
    for var in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
        if let Ok(dir) = std::env::var(var) {
            let path = PathBuf::from(dir);
            if path.is_dir() {
                return path;
            }
        }
    }
    PathBuf::from("/tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.gpg", "a.gpg", "c.asc", "ignored.txt", ".hidden.gpg", "bad name.gpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.gpg")).unwrap();

        let files = list_dir_filtered(dir.path(), &["gpg", "asc"]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.gpg", "b.gpg", "c.asc"]);
    }

    #[test]
    fn missing_dir_is_an_error() {
        assert!(list_dir_filtered(Path::new("/nonexistent-dir"), &[]).is_err());
    }
}
