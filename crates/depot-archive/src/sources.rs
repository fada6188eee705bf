use std::io::Write;
use std::path::{Path, PathBuf};

use depot_hashes::HashKind;
use depot_signed::read_payload;
use depot_tagfile::{Rewrite, Scanned, TagSection};

use crate::cachedb::{CacheDb, Tag};
use crate::error::{ArchiveError, Result};
use crate::overrides::OverrideTable;

/// The canonical field order of a Sources paragraph.
pub const SOURCE_ORDER: &[&str] = &[
    "Package",
    "Source",
    "Binary",
    "Version",
    "Priority",
    "Section",
    "Maintainer",
    "Original-Maintainer",
    "Build-Depends",
    "Build-Depends-Indep",
    "Build-Conflicts",
    "Build-Conflicts-Indep",
    "Architecture",
    "Standards-Version",
    "Format",
    "Directory",
    "Files",
    "Checksums-Sha1",
    "Checksums-Sha256",
    "Checksums-Sha512",
];

/// Emits one Sources paragraph per `.dsc` file (clearsigned or plain).
pub struct SourcesWriter<'a> {
    output: &'a mut dyn Write,
    overrides: OverrideTable,
    base: PathBuf,
}

impl<'a> SourcesWriter<'a> {
    pub fn new(output: &'a mut dyn Write, base: &Path) -> SourcesWriter<'a> {
        SourcesWriter {
            output,
            overrides: OverrideTable::default(),
            base: base.to_path_buf(),
        }
    }

    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn write_source(&mut self, db: &mut CacheDb, path: &Path) -> Result<()> {
        let text = match db.get_blob(path, Tag::Source)? {
            Some(cached) => cached,
            None => {
                let payload = read_payload(path)?;
                db.put_blob(path, Tag::Source, &payload)?;
                payload
            }
        };
        let section = match TagSection::scan(&text, true)? {
            Scanned::Section(section, _) => section,
            Scanned::Incomplete => {
                return Err(ArchiveError::MissingField {
                    path: path.to_path_buf(),
                    field: "Source",
                })
            }
        };
        let package = section
            .find("Source")
            .map(|s| s.to_string())
            .ok_or(ArchiveError::MissingField {
                path: path.to_path_buf(),
                field: "Source",
            })?;

        let hashes = db.hashes_for(path)?;
        let size = hashes.file_size().unwrap_or(0);
        let dsc_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let directory = path
            .parent()
            .map(|p| p.strip_prefix(&self.base).unwrap_or(p))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut changes: Vec<Rewrite> = vec![
            Rewrite::remove("Source"),
            Rewrite::set("Package", package.clone()),
            Rewrite::set("Directory", directory),
            Rewrite::remove("Status"),
        ];

        // the dsc itself joins each checksum list it has a digest for
        let lists = [
            ("Files", HashKind::Md5),
            ("Checksums-Sha1", HashKind::Sha1),
            ("Checksums-Sha256", HashKind::Sha256),
            ("Checksums-Sha512", HashKind::Sha512),
        ];
        for (field, kind) in lists {
            let Some(own) = hashes.find(kind) else {
                continue;
            };
            let mut value = String::new();
            value.push_str(&format!("\n {} {} {}", own.value(), size, dsc_name));
            if let Some(existing) = section.find_raw(field) {
                value.push_str(existing);
            }
            changes.push(Rewrite::set(field, value));
        }

        if let Some(item) = self.overrides.get(&package) {
            if !item.priority.is_empty() {
                changes.push(Rewrite::set("Priority", item.priority.clone()));
            }
            let current = section.find("Maintainer").unwrap_or("");
            if let Some(new_maint) = item.swap_maintainer(current) {
                changes.push(Rewrite::set("Maintainer", new_maint));
            }
            for (field, value) in &item.fields {
                changes.push(Rewrite::set(field.clone(), value.clone()));
            }
        }

        section.write(&mut self.output, Some(SOURCE_ORDER), &changes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSC: &str = "Format: 3.0 (quilt)\nSource: demo\nBinary: demo\nVersion: 1.0-1\n\
                       Maintainer: Demo <d@x>\nStandards-Version: 4.6.2\n\
                       Files:\n 0123456789abcdef0123456789abcdef 42 demo_1.0.orig.tar.gz\n";

    #[test]
    fn writes_source_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let pool = dir.path().join("pool/main");
        std::fs::create_dir_all(&pool).unwrap();
        let dsc = pool.join("demo_1.0-1.dsc");
        std::fs::write(&dsc, DSC).unwrap();

        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();
        let mut out = Vec::new();
        SourcesWriter::new(&mut out, dir.path())
            .write_source(&mut db, &dsc)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Package: demo\n"), "{text}");
        assert!(!text.contains("\nSource:"));
        assert!(text.contains("Directory: pool/main\n"));
        assert!(text.contains("demo_1.0-1.dsc"));
        assert!(text.contains("demo_1.0.orig.tar.gz"));

        // the paragraph reparses and keeps both file entries
        let section = match TagSection::scan(text.as_bytes(), true).unwrap() {
            Scanned::Section(section, _) => section,
            Scanned::Incomplete => unreachable!(),
        };
        let files = section.find("Files").unwrap();
        assert_eq!(files.lines().count(), 2);
    }

    #[test]
    fn source_override_changes_section() {
        let dir = tempfile::tempdir().unwrap();
        let dsc = dir.path().join("demo.dsc");
        std::fs::write(&dsc, DSC).unwrap();
        let override_file = dir.path().join("override.src");
        std::fs::write(&override_file, "demo contrib/utils\n").unwrap();

        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();
        let overrides = OverrideTable::read_source(&override_file).unwrap();
        let mut out = Vec::new();
        SourcesWriter::new(&mut out, dir.path())
            .with_overrides(overrides)
            .write_source(&mut db, &dsc)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Section: contrib/utils\n"));
    }
}
