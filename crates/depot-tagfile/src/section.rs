use std::io::Write;

use crate::error::{Result, TagError};

/// Fields beyond this are a malformed paragraph, not metadata.
const MAX_FIELDS: usize = 2048;

#[derive(Debug, Clone, Copy)]
struct Field {
    tag_start: usize,
    tag_end: usize,
    value_start: usize,
    end: usize,
}

/// One `Field: value` paragraph, indexed for case-insensitive lookup.
///
/// Continuation lines (leading space or tab) belong to the preceding
/// field. [`TagSection::find`] trims surrounding whitespace;
/// [`TagSection::find_raw`] keeps the continuation layout byte-exact.
#[derive(Debug, Clone, Default)]
pub struct TagSection {
    data: Vec<u8>,
    fields: Vec<Field>,
}

/// Outcome of scanning a byte window for one paragraph.
pub enum Scanned {
    /// A paragraph plus the bytes it consumed (including the blank line).
    Section(TagSection, usize),
    /// No blank-line boundary yet; feed more bytes.
    Incomplete,
}

fn line_end(data: &[u8], from: usize) -> usize {
    data[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| from + i + 1)
        .unwrap_or(data.len())
}

impl TagSection {
    /// Scan one paragraph out of `data`. When `may_be_partial`, a
    /// missing final blank line is accepted and the whole input forms
    /// the section.
    pub fn scan(data: &[u8], may_be_partial: bool) -> Result<Scanned> {
        // find the end of the paragraph: the first blank line
        let mut end = None;
        let mut consumed = data.len();
        let mut i = 0;
        while i < data.len() {
            let eol = line_end(data, i);
            let line = &data[i..eol];
            let blank = line == b"\n" || line == b"\r\n";
            if blank && i > 0 {
                end = Some(i);
                consumed = eol;
                break;
            }
            if blank {
                // leading blank lines are padding between paragraphs
                i = eol;
                continue;
            }
            i = eol;
        }

        let (body_start, body_end) = match end {
            Some(e) => (0, e),
            None if may_be_partial => (0, data.len()),
            None => return Ok(Scanned::Incomplete),
        };

        let mut section = TagSection::default();
        section.data = data[body_start..body_end].to_vec();
        section.index()?;
        Ok(Scanned::Section(section, consumed))
    }

    fn index(&mut self) -> Result<()> {
        self.fields.clear();
        let data = &self.data;
        let mut i = 0;
        let mut line_no = 0;
        while i < data.len() {
            line_no += 1;
            let eol = line_end(data, i);
            let line = &data[i..eol];
            if line == b"\n" || line == b"\r\n" {
                i = eol;
                continue;
            }
            if matches!(line.first(), Some(b' ' | b'\t')) {
                // continuation belongs to the previous field
                match self.fields.last_mut() {
                    Some(field) => field.end = eol,
                    None => return Err(TagError::BadTagLine(line_no)),
                }
                i = eol;
                continue;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(TagError::BadTagLine(line_no))?;
            if self.fields.len() >= MAX_FIELDS {
                return Err(TagError::SectionTooLarge);
            }
            // one optional space directly after the colon is separator
            let mut value_start = i + colon + 1;
            if data.get(value_start) == Some(&b' ') {
                value_start += 1;
            }
            self.fields.push(Field {
                tag_start: i,
                tag_end: i + colon,
                value_start,
                end: eol,
            });
            i = eol;
        }
        Ok(())
    }

    fn field(&self, tag: &str) -> Option<&Field> {
        self.fields.iter().find(|f| {
            let name = &self.data[f.tag_start..f.tag_end];
            name.eq_ignore_ascii_case(tag.as_bytes())
        })
    }

    pub fn exists(&self, tag: &str) -> bool {
        self.field(tag).is_some()
    }

    /// Number of fields, later duplicates included.
    pub fn count(&self) -> usize {
        self.fields.len()
    }

    /// The field names in parse order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| {
            std::str::from_utf8(&self.data[f.tag_start..f.tag_end]).ok()
        })
    }

    /// Value with surrounding whitespace trimmed; continuation layout
    /// inside the value is preserved.
    pub fn find(&self, tag: &str) -> Option<&str> {
        let field = self.field(tag)?;
        let raw = &self.data[field.value_start..field.end];
        let text = std::str::from_utf8(raw).ok()?;
        Some(text.trim_matches([' ', '\t', '\r', '\n']))
    }

    /// Value bytes exactly as they follow the colon, with only the
    /// final line terminator removed.
    pub fn find_raw(&self, tag: &str) -> Option<&str> {
        let field = self.field(tag)?;
        let raw = &self.data[field.value_start..field.end];
        let text = std::str::from_utf8(raw).ok()?;
        Some(text.trim_end_matches(['\r', '\n']))
    }

    pub fn find_u64(&self, tag: &str, default: u64) -> u64 {
        match self.find(tag) {
            Some(value) => value.parse().unwrap_or(default),
            None => default,
        }
    }

    pub fn find_i64(&self, tag: &str, default: i64) -> i64 {
        match self.find(tag) {
            Some(value) => value.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Set or clear `bit` in `flags` according to the field's boolean
    /// spelling. An absent field leaves the flags alone and reports
    /// true; an unparseable value leaves them alone and reports false.
    pub fn find_flag(&self, tag: &str, flags: &mut u64, bit: u64) -> bool {
        let Some(value) = self.find(tag) else {
            return true;
        };
        match depot_util::parse_bool(value) {
            Some(true) => {
                *flags |= bit;
                true
            }
            Some(false) => {
                *flags &= !bit;
                true
            }
            None => false,
        }
    }

    /// Serialize the paragraph. Fields named in `order` come first (in
    /// that order, when present or added), the rest follow in parse
    /// order. `rewrites` may rename, remove, replace, or introduce
    /// fields; rewriting to an empty value removes.
    pub fn write(
        &self,
        out: &mut impl Write,
        order: Option<&[&str]>,
        rewrites: &[Rewrite],
    ) -> Result<()> {
        let mut done: Vec<String> = Vec::new();
        let mut queue: Vec<String> = Vec::new();

        if let Some(order) = order {
            queue.extend(order.iter().map(|t| t.to_string()));
        }
        queue.extend(self.tags().map(|t| t.to_string()));
        for rewrite in rewrites {
            if matches!(&rewrite.op, RewriteOp::Rewrite(v) if !v.is_empty()) {
                queue.push(rewrite.tag.clone());
            }
        }

        for tag in queue {
            if done.iter().any(|w| w.eq_ignore_ascii_case(&tag)) {
                continue;
            }
            done.push(tag.clone());

            let rewrite = rewrites
                .iter()
                .find(|r| r.tag.eq_ignore_ascii_case(&tag));
            let (name, value) = match rewrite.map(|r| &r.op) {
                Some(RewriteOp::Remove) => continue,
                Some(RewriteOp::Rewrite(v)) => {
                    if v.is_empty() {
                        continue;
                    }
                    (tag.clone(), v.clone())
                }
                Some(RewriteOp::Rename(new)) => match self.find_raw(&tag) {
                    Some(raw) => (new.clone(), raw.to_string()),
                    None => continue,
                },
                None => match self.find_raw(&tag) {
                    Some(raw) => (tag.clone(), raw.to_string()),
                    None => continue,
                },
            };

            if value.starts_with('\n') || value.starts_with("\r\n") {
                writeln!(out, "{name}:{value}").map_err(depot_io::IoError::WriteError)?;
            } else {
                writeln!(out, "{name}: {value}").map_err(depot_io::IoError::WriteError)?;
            }
        }

        out.write_all(b"\n").map_err(depot_io::IoError::WriteError)?;
        Ok(())
    }
}

/// One rewrite instruction for [`TagSection::write`].
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub tag: String,
    pub op: RewriteOp,
}

#[derive(Debug, Clone)]
pub enum RewriteOp {
    Rename(String),
    Remove,
    Rewrite(String),
}

impl Rewrite {
    pub fn set(tag: impl Into<String>, value: impl Into<String>) -> Rewrite {
        Rewrite {
            tag: tag.into(),
            op: RewriteOp::Rewrite(value.into()),
        }
    }

    pub fn remove(tag: impl Into<String>) -> Rewrite {
        Rewrite {
            tag: tag.into(),
            op: RewriteOp::Remove,
        }
    }

    pub fn rename(tag: impl Into<String>, new: impl Into<String>) -> Rewrite {
        Rewrite {
            tag: tag.into(),
            op: RewriteOp::Rename(new.into()),
        }
    }
}
