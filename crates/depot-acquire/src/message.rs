use std::fmt::Write as _;

use crate::error::{AcquireError, Result};

/// One wire message: a three-digit status code with a short phrase,
/// followed by `Name: value` header fields, terminated by a blank line.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub code: u16,
    pub phrase: String,
    headers: Vec<(String, String)>,
}

impl Message {
    pub fn new(code: u16, phrase: impl Into<String>) -> Message {
        Message {
            code,
            phrase: phrase.into(),
            headers: Vec::new(),
        }
    }

    /// Parse one framed message (without the trailing blank line).
    pub fn parse(text: &str) -> Result<Message> {
        let mut lines = text.lines();
        let status = lines
            .next()
            .ok_or_else(|| AcquireError::Protocol("empty message".to_string()))?;
        let code: u16 = status
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| AcquireError::Protocol(format!("bad status line: {status}")))?;
        let phrase = status.get(3..).unwrap_or("").trim().to_string();

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                // continuation of the previous header value
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(line.trim_start());
                    }
                    None => {
                        return Err(AcquireError::Protocol(format!(
                            "continuation without header: {line}"
                        )))
                    }
                }
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                AcquireError::Protocol(format!("malformed header: {line}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Message {
            code,
            phrase,
            headers,
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Message {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_opt(self, name: &str, value: Option<String>) -> Message {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    /// First value of `name`, ASCII-case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`, for repeated fields like `Config-Item`.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Render with the blank-line terminator.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} {}", self.code, self.phrase);
        for (name, value) in &self.headers {
            let mut parts = value.split('\n');
            let _ = writeln!(out, "{}: {}", name, parts.next().unwrap_or(""));
            for cont in parts {
                let _ = writeln!(out, " {cont}");
            }
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers() {
        let msg = Message::parse(
            "600 URI Acquire\nURI: http://ex.org/a\nFilename: /tmp/a\nExpected-SHA256: aa",
        )
        .unwrap();
        assert_eq!(msg.code, 600);
        assert_eq!(msg.phrase, "URI Acquire");
        assert_eq!(msg.get("uri"), Some("http://ex.org/a"));
        assert_eq!(msg.get("Expected-SHA256"), Some("aa"));
        assert_eq!(msg.get("Missing"), None);
    }

    #[test]
    fn repeated_headers() {
        let msg =
            Message::parse("601 Configuration\nConfig-Item: A=1\nConfig-Item: B=2").unwrap();
        let items: Vec<&str> = msg.get_all("Config-Item").collect();
        assert_eq!(items, vec!["A=1", "B=2"]);
    }

    #[test]
    fn continuation_lines_join() {
        let msg = Message::parse("201 URI Done\nSigned-By: AAAA\n BBBB").unwrap();
        assert_eq!(msg.get("Signed-By"), Some("AAAA\nBBBB"));
    }

    #[test]
    fn renders_framed() {
        let msg = Message::new(200, "URI Start")
            .header("URI", "http://ex.org/a")
            .header("Size", "1234");
        assert_eq!(
            msg.render(),
            "200 URI Start\nURI: http://ex.org/a\nSize: 1234\n\n"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Message::parse("").is_err());
        assert!(Message::parse("nope").is_err());
        assert!(Message::parse("600 URI Acquire\nbroken header").is_err());
    }
}
