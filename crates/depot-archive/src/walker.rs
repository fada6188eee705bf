use std::path::{Path, PathBuf};

use crate::error::Result;

/// Depth-first walk yielding regular files whose name matches one of
/// the glob-ish patterns (`*.deb`, `*.dsc`, `*_amd64.deb`). Results
/// come back sorted so output and cache locality stay stable.
pub fn walk_tree(root: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    descend(root, patterns, &mut found)?;
    found.sort();
    Ok(found)
}

fn descend(dir: &Path, patterns: &[&str], found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::warn!(dir = %dir.display(), "cannot read directory, skipping");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            descend(&path, patterns, found)?;
        } else if file_type.is_file() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if patterns.iter().any(|p| matches_pattern(name, p)) {
                found.push(path);
            }
        }
    }
    Ok(())
}

/// `*` matches any run of characters; everything else is literal.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    fn matches(name: &[u8], pattern: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(name, &pattern[1..])
                    || (!name.is_empty() && matches(&name[1..], pattern))
            }
            (Some(p), Some(n)) if p == n => matches(&name[1..], &pattern[1..]),
            _ => false,
        }
    }
    matches(name.as_bytes(), pattern.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("foo_1.0_amd64.deb", "*.deb"));
        assert!(matches_pattern("foo_1.0_amd64.deb", "*_amd64.deb"));
        assert!(!matches_pattern("foo_1.0_i386.deb", "*_amd64.deb"));
        assert!(matches_pattern("bar.dsc", "*.dsc"));
        assert!(!matches_pattern("bar.dsc.asc", "*.dsc"));
    }

    #[test]
    fn walks_recursively_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pool/main/b")).unwrap();
        std::fs::create_dir_all(dir.path().join("pool/main/a")).unwrap();
        for name in [
            "pool/main/b/b_1.deb",
            "pool/main/a/a_1.deb",
            "pool/main/a/a_1.dsc",
            "pool/main/a/README",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let debs = walk_tree(dir.path(), &["*.deb"]).unwrap();
        let names: Vec<_> = debs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a_1.deb", "b_1.deb"]);
    }
}
