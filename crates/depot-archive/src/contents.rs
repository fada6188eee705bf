use std::io::Write;
use std::path::Path;

use crate::cachedb::{CacheDb, Tag};
use crate::debfile::DebFile;
use crate::error::Result;

/// Accumulates `path → package[,package…]` pairs as a tree keyed by
/// path components, one level per directory segment, packages chained
/// per shared path. In-order traversal writes the sorted listing.
#[derive(Debug, Default)]
pub struct ContentsWriter {
    root: Node,
    entries: u64,
}

#[derive(Debug, Default)]
struct Node {
    children: std::collections::BTreeMap<String, Node>,
    /// packages owning exactly this path, insertion-ordered chain
    owners: Vec<String>,
}

impl ContentsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every shipped path of the package file, preferring the
    /// cached listing when present.
    pub fn add_package(&mut self, db: &mut CacheDb, path: &Path, qualified: &str) -> Result<()> {
        let listing = match db.get_blob(path, Tag::Contents)? {
            Some(cached) => String::from_utf8_lossy(&cached).into_owned(),
            None => {
                let deb = DebFile::read(path)?;
                let listing = deb.contents.join("\n");
                db.put_blob(path, Tag::Contents, listing.as_bytes())?;
                listing
            }
        };
        for file in listing.lines().filter(|l| !l.is_empty()) {
            self.add(file, qualified);
        }
        Ok(())
    }

    pub fn add(&mut self, path: &str, package: &str) {
        let mut node = &mut self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node.children.entry(part.to_string()).or_default();
        }
        if !node.owners.iter().any(|p| p == package) {
            node.owners.push(package.to_string());
            self.entries += 1;
        }
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Write `path<whitespace>pkg1,pkg2` lines, paths in tree order.
    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        fn walk(node: &Node, prefix: &str, out: &mut dyn Write) -> std::io::Result<()> {
            for (name, child) in &node.children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                if !child.owners.is_empty() {
                    writeln!(out, "{:<55} {}", path, child.owners.join(","))?;
                }
                walk(child, &path, out)?;
            }
            Ok(())
        }
        walk(&self.root, "", out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_path_and_chains_packages() {
        let mut contents = ContentsWriter::new();
        contents.add("usr/bin/zeta", "utils/zeta");
        contents.add("usr/bin/alpha", "utils/alpha");
        contents.add("usr/bin/alpha", "misc/other-alpha");
        contents.add("etc/alpha.conf", "utils/alpha");

        let mut out = Vec::new();
        contents.write(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("etc/alpha.conf"));
        assert!(lines[1].starts_with("usr/bin/alpha"));
        assert!(lines[1].ends_with("utils/alpha,misc/other-alpha"));
        assert!(lines[2].starts_with("usr/bin/zeta"));
        assert_eq!(contents.entries(), 4);
    }

    #[test]
    fn duplicate_claims_count_once() {
        let mut contents = ContentsWriter::new();
        contents.add("usr/share/doc/x", "x");
        contents.add("usr/share/doc/x", "x");
        assert_eq!(contents.entries(), 1);
    }
}
