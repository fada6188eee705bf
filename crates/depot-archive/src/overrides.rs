use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

/// One override entry: a forced priority and section, an optional
/// maintainer rewrite, and free-form extra fields.
#[derive(Debug, Clone, Default)]
pub struct OverrideItem {
    pub priority: String,
    /// maintainer pattern: rewrite applies when the old value matches
    /// (or the pattern is `*`)
    pub old_maint: String,
    pub new_maint: String,
    pub fields: HashMap<String, String>,
}

impl OverrideItem {
    /// The maintainer to emit given the package's current one.
    pub fn swap_maintainer(&self, current: &str) -> Option<String> {
        if self.new_maint.is_empty() {
            return None;
        }
        if self.old_maint == "*" || self.old_maint == current {
            return Some(self.new_maint.clone());
        }
        None
    }
}

/// Parsed override tables, binary or source flavored.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<String, OverrideItem>,
}

impl OverrideTable {
    pub fn get(&self, package: &str) -> Option<&OverrideItem> {
        self.entries.get(package)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary override: `package priority section [maintainer pattern]`,
    /// where the pattern is either `new` or `old => new`.
    pub fn read_binary(path: &Path) -> std::io::Result<OverrideTable> {
        let mut table = OverrideTable::default();
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(4, char::is_whitespace);
            let (Some(package), Some(priority), Some(section)) =
                (fields.next(), fields.next(), fields.next())
            else {
                tracing::warn!(path = %path.display(), line = number + 1, "malformed override line");
                continue;
            };
            let mut item = OverrideItem {
                priority: priority.to_string(),
                ..OverrideItem::default()
            };
            item.fields
                .insert("Section".to_string(), section.trim().to_string());
            if let Some(maint) = fields.next() {
                let maint = maint.trim();
                match maint.split_once("=>") {
                    Some((old, new)) => {
                        item.old_maint = old.trim().to_string();
                        item.new_maint = new.trim().to_string();
                    }
                    None => {
                        item.old_maint = "*".to_string();
                        item.new_maint = maint.to_string();
                    }
                }
            }
            table.entries.insert(package.to_string(), item);
        }
        Ok(table)
    }

    /// Source override: `package section` only.
    pub fn read_source(path: &Path) -> std::io::Result<OverrideTable> {
        let mut table = OverrideTable::default();
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(package), Some(section)) = (fields.next(), fields.next()) else {
                tracing::warn!(path = %path.display(), line = number + 1, "malformed override line");
                continue;
            };
            let mut item = OverrideItem::default();
            item.fields
                .insert("Section".to_string(), section.to_string());
            table.entries.insert(package.to_string(), item);
        }
        Ok(table)
    }

    /// Extra override: `package fieldname value`, injected verbatim.
    pub fn read_extra(&mut self, path: &Path) -> std::io::Result<()> {
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, char::is_whitespace);
            let (Some(package), Some(field), Some(value)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            self.entries
                .entry(package.to_string())
                .or_default()
                .fields
                .insert(field.to_string(), value.trim().to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn binary_override_with_maintainer_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "override",
            "demo optional utils Old Maint <o@x> => New Maint <n@x>\n\
             plain extra admin\n\
             # comment\n\
             broken\n",
        );
        let table = OverrideTable::read_binary(&path).unwrap();

        let demo = table.get("demo").unwrap();
        assert_eq!(demo.priority, "optional");
        assert_eq!(demo.fields["Section"], "utils");
        assert_eq!(
            demo.swap_maintainer("Old Maint <o@x>"),
            Some("New Maint <n@x>".to_string())
        );
        assert_eq!(demo.swap_maintainer("Somebody Else <e@x>"), None);

        let plain = table.get("plain").unwrap();
        assert_eq!(plain.priority, "extra");
        assert!(table.get("broken").is_none());
    }

    #[test]
    fn extra_override_injects_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "extra", "demo Task desktop\n");
        let mut table = OverrideTable::default();
        table.read_extra(&path).unwrap();
        assert_eq!(table.get("demo").unwrap().fields["Task"], "desktop");
    }
}
