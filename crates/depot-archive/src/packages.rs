use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use depot_hashes::{HashKind, MultiHasher};
use depot_tagfile::{Rewrite, TagSection};

use crate::cachedb::{CacheDb, Tag};
use crate::debfile::DebFile;
use crate::error::{ArchiveError, Result};
use crate::overrides::OverrideTable;

/// The canonical field order of a Packages paragraph.
pub const PACKAGE_ORDER: &[&str] = &[
    "Package",
    "Essential",
    "Status",
    "Priority",
    "Section",
    "Installed-Size",
    "Maintainer",
    "Original-Maintainer",
    "Architecture",
    "Source",
    "Version",
    "Replaces",
    "Provides",
    "Depends",
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Conflicts",
    "Breaks",
    "Conffiles",
    "Filename",
    "Size",
    "MD5sum",
    "SHA1",
    "SHA256",
    "SHA512",
    "Description",
];

/// Emits one Packages paragraph per binary package file, with override
/// handling and an optional deduplicated long-description stream.
pub struct PackagesWriter<'a> {
    output: &'a mut dyn Write,
    translation: Option<&'a mut TranslationWriter>,
    overrides: OverrideTable,
    extra_overrides: OverrideTable,
    /// path prefix stripped from on-disk paths to form `Filename:`
    base: PathBuf,
}

impl<'a> PackagesWriter<'a> {
    pub fn new(output: &'a mut dyn Write, base: &Path) -> PackagesWriter<'a> {
        PackagesWriter {
            output,
            translation: None,
            overrides: OverrideTable::default(),
            extra_overrides: OverrideTable::default(),
            base: base.to_path_buf(),
        }
    }

    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_extra_overrides(mut self, extra: OverrideTable) -> Self {
        self.extra_overrides = extra;
        self
    }

    pub fn with_translation(mut self, translation: &'a mut TranslationWriter) -> Self {
        self.translation = Some(translation);
        self
    }

    /// Process one `.deb`: hashes and control come from the cache when
    /// the file is unchanged, the paragraph goes to the output.
    pub fn write_package(&mut self, db: &mut CacheDb, path: &Path) -> Result<()> {
        let control = match db.get_blob(path, Tag::Control)? {
            Some(cached) if self.stat_matches(db, path)? => cached,
            _ => {
                let deb = DebFile::read(path)?;
                db.put_blob(path, Tag::Control, &deb.control)?;
                db.put_blob(path, Tag::Contents, deb.contents.join("\n").as_bytes())?;
                deb.control
            }
        };
        let hashes = db.hashes_for(path)?;

        let section = match depot_tagfile::TagSection::scan(&control, true)? {
            depot_tagfile::Scanned::Section(section, _) => section,
            depot_tagfile::Scanned::Incomplete => {
                return Err(ArchiveError::NoControlMember {
                    path: path.to_path_buf(),
                })
            }
        };
        let package =
            section
                .find("Package")
                .map(|p| p.to_string())
                .ok_or(ArchiveError::MissingField {
                    path: path.to_path_buf(),
                    field: "Package",
                })?;

        let filename = path
            .strip_prefix(&self.base)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        let mut changes: Vec<Rewrite> = Vec::new();
        changes.push(Rewrite::set(
            "Size",
            hashes.file_size().unwrap_or(0).to_string(),
        ));
        if let Some(md5) = hashes.find(HashKind::Md5) {
            changes.push(Rewrite::set("MD5sum", md5.value()));
        }
        for kind in [HashKind::Sha1, HashKind::Sha256, HashKind::Sha512] {
            if let Some(hash) = hashes.find(kind) {
                changes.push(Rewrite::set(kind.as_str(), hash.value()));
            }
        }
        changes.push(Rewrite::set("Filename", filename));
        changes.push(Rewrite::remove("Status"));
        changes.push(Rewrite::remove("Optional"));

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
        if let Some(item) = self.extra_overrides.get(&package) {
            for (field, value) in &item.fields {
                changes.push(Rewrite::set(field.clone(), value.clone()));
            }
        }

        if let Some(translation) = self.translation.as_deref_mut() {
            if let Some(trimmed) = translation.strip_description(&section, &package)? {
                changes.push(Rewrite::set("Description", trimmed.summary));
                changes.push(Rewrite::set("Description-md5", trimmed.digest));
            }
        }

        section.write(&mut self.output, Some(PACKAGE_ORDER), &changes)?;
        Ok(())
    }

    fn stat_matches(&self, db: &mut CacheDb, path: &Path) -> Result<bool> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(matches!(
            db.get_stat(path)?,
            Some(record) if record.mtime == mtime && record.size == meta.len()
        ))
    }
}

/// What [`TranslationWriter::strip_description`] hands back for the
/// Packages paragraph.
pub struct StrippedDescription {
    pub summary: String,
    pub digest: String,
}

/// The `Translation-master` stream: long descriptions, deduplicated by
/// `(package, md5(description))`.
pub struct TranslationWriter {
    output: Box<dyn Write>,
    seen: HashSet<(String, String)>,
}

impl TranslationWriter {
    pub fn new(output: Box<dyn Write>) -> TranslationWriter {
        TranslationWriter {
            output,
            seen: HashSet::new(),
        }
    }

    /// Move the long description out of the paragraph: the summary
    /// line stays, the full text goes to the translation stream once
    /// per distinct content.
    pub fn strip_description(
        &mut self,
        section: &TagSection,
        package: &str,
    ) -> Result<Option<StrippedDescription>> {
        let Some(description) = section.find("Description") else {
            return Ok(None);
        };
        let mut hasher = MultiHasher::from_mask(HashKind::Md5.mask_bit());
        hasher.add(description.as_bytes());
        hasher.add(b"\n");
        let digest = hasher
            .result()
            .find(HashKind::Md5)
            .map(|h| h.value().to_string())
            .unwrap_or_default();

        let summary = description
            .lines()
            .next()
            .unwrap_or("")
            .to_string();

        let key = (package.to_string(), digest.clone());
        if self.seen.insert(key) {
            writeln!(self.output, "Package: {package}")?;
            writeln!(self.output, "Description-md5: {digest}")?;
            writeln!(self.output, "Description-en: {description}")?;
            writeln!(self.output)?;
        }

        Ok(Some(StrippedDescription { summary, digest }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debfile::build_deb;

    const CONTROL: &str = "Package: demo\nVersion: 1.0\nArchitecture: amd64\n\
                           Maintainer: Old Maint <o@x>\nSection: misc\n\
                           Description: short summary\n extended text\n";

    fn deb_in(dir: &Path) -> PathBuf {
        let pool = dir.join("pool");
        std::fs::create_dir_all(&pool).unwrap();
        let path = pool.join("demo_1.0_amd64.deb");
        std::fs::write(
            &path,
            build_deb(CONTROL, &[("usr/bin/demo", b"x".as_slice())]),
        )
        .unwrap();
        path
    }

    #[test]
    fn writes_paragraph_with_hashes_and_filename() {
        let dir = tempfile::tempdir().unwrap();
        let deb = deb_in(dir.path());
        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();

        let mut out = Vec::new();
        let mut writer = PackagesWriter::new(&mut out, dir.path());
        writer.write_package(&mut db, &deb).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Package: demo\n"), "{text}");
        assert!(text.contains("Filename: pool/demo_1.0_amd64.deb\n"));
        assert!(text.contains("SHA256: "));
        assert!(text.contains("MD5sum: "));
        let size = std::fs::metadata(&deb).unwrap().len();
        assert!(text.contains(&format!("Size: {size}\n")));

        // field order: Package before Maintainer before Filename
        let package_at = text.find("Package:").unwrap();
        let maint_at = text.find("Maintainer:").unwrap();
        let filename_at = text.find("Filename:").unwrap();
        assert!(package_at < maint_at && maint_at < filename_at);
    }

    #[test]
    fn override_rewrites_priority_and_maintainer() {
        let dir = tempfile::tempdir().unwrap();
        let deb = deb_in(dir.path());
        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();

        let override_file = dir.path().join("override");
        std::fs::write(
            &override_file,
            "demo required utils Old Maint <o@x> => New Maint <n@x>\n",
        )
        .unwrap();
        let overrides = OverrideTable::read_binary(&override_file).unwrap();

        let mut out = Vec::new();
        let mut writer = PackagesWriter::new(&mut out, dir.path()).with_overrides(overrides);
        writer.write_package(&mut db, &deb).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Priority: required\n"));
        assert!(text.contains("Section: utils\n"));
        assert!(text.contains("Maintainer: New Maint <n@x>\n"));
    }

    #[test]
    fn second_run_reuses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let deb = deb_in(dir.path());
        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();

        let mut first = Vec::new();
        PackagesWriter::new(&mut first, dir.path())
            .write_package(&mut db, &deb)
            .unwrap();
        let mut second = Vec::new();
        PackagesWriter::new(&mut second, dir.path())
            .write_package(&mut db, &deb)
            .unwrap();

        assert_eq!(first, second);
        let (hits, _) = db.stats();
        assert!(hits >= 1);
    }

    #[test]
    fn translation_stream_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let deb = deb_in(dir.path());
        let mut db = CacheDb::open(&dir.path().join("cache.db")).unwrap();

        let translation_buf: Vec<u8> = Vec::new();
        let mut translation = TranslationWriter::new(Box::new(translation_buf));

        let mut out = Vec::new();
        let mut writer =
            PackagesWriter::new(&mut out, dir.path()).with_translation(&mut translation);
        writer.write_package(&mut db, &deb).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Description: short summary\n"), "{text}");
        assert!(text.contains("Description-md5: "));
        assert!(!text.contains("extended text"));
    }
}
