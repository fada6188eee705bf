use depot_io::BufFile;

use crate::error::Result;
use crate::section::{Scanned, TagSection};

/// Streaming reader yielding one [`TagSection`] per paragraph of a
/// (possibly huge) metadata file.
pub struct TagFile {
    input: BufFile,
    buffer: Vec<u8>,
    eof: bool,
    comments: bool,
    /// carries a partial line between reads in comment mode
    pending_line: Vec<u8>,
}

impl TagFile {
    pub fn new(input: BufFile) -> Self {
        Self {
            input,
            buffer: Vec::new(),
            eof: false,
            comments: false,
            pending_line: Vec::new(),
        }
    }

    /// Elide comment lines before paragraph assembly: lines whose
    /// first non-whitespace byte is `#` vanish, a trailing `#…` on a
    /// value line is cut off, and paragraphs that were nothing but
    /// comments are skipped.
    pub fn with_comments(mut self) -> Self {
        self.comments = true;
        self
    }

    fn refill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = [0u8; 16 * 1024];
        let got = self.input.read(&mut chunk)?;
        if got == 0 {
            self.eof = true;
            // a trailing unterminated line still counts
            if self.comments && !self.pending_line.is_empty() {
                let line = std::mem::take(&mut self.pending_line);
                self.push_filtered(&line);
            }
            return Ok(false);
        }
        if self.comments {
            self.feed_filtered(&chunk[..got]);
        } else {
            self.buffer.extend_from_slice(&chunk[..got]);
        }
        Ok(true)
    }

    fn feed_filtered(&mut self, data: &[u8]) {
        for &b in data {
            self.pending_line.push(b);
            if b == b'\n' {
                let line = std::mem::take(&mut self.pending_line);
                self.push_filtered(&line);
            }
        }
    }

    fn push_filtered(&mut self, line: &[u8]) {
        let trimmed: &[u8] = {
            let mut s = line;
            while matches!(s.first(), Some(b' ' | b'\t')) {
                s = &s[1..];
            }
            s
        };
        if trimmed.first() == Some(&b'#') {
            return;
        }
        match line.iter().position(|&b| b == b'#') {
            Some(hash) => {
                let mut cut = line[..hash].to_vec();
                while matches!(cut.last(), Some(b' ' | b'\t')) {
                    cut.pop();
                }
                cut.push(b'\n');
                self.buffer.extend_from_slice(&cut);
            }
            None => self.buffer.extend_from_slice(line),
        }
    }

    /// The next paragraph, or `None` at end of input.
    pub fn step(&mut self) -> Result<Option<TagSection>> {
        loop {
            // drop inter-paragraph padding
            let mut start = 0;
            while matches!(self.buffer.get(start), Some(b'\n' | b'\r')) {
                start += 1;
            }
            if start > 0 {
                self.buffer.drain(..start);
            }

            if self.buffer.is_empty() {
                if !self.refill()? {
                    return Ok(None);
                }
                continue;
            }

            match TagSection::scan(&self.buffer, self.eof)? {
                Scanned::Section(section, consumed) => {
                    self.buffer.drain(..consumed);
                    if section.count() == 0 {
                        // a paragraph of nothing but comments
                        continue;
                    }
                    return Ok(Some(section));
                }
                Scanned::Incomplete => {
                    // at EOF the next scan accepts the partial tail
                    self.refill()?;
                }
            }
        }
    }
}
