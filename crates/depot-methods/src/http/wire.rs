use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_acquire::{wait_fd, AcquireError, MethodFd, Result};
use depot_util::parse_rfc1123;

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Chunked,
    Stream,
    Closes,
}

/// Parsed status line plus the headers the method acts on.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub major: u8,
    pub minor: u8,
    pub encoding: Encoding,
    pub content_length: u64,
    pub start_pos: u64,
    pub total_size: u64,
    pub have_content: bool,
    pub connection_close: bool,
    pub ranges_denied: bool,
    pub location: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            status: 0,
            major: 1,
            minor: 1,
            encoding: Encoding::Closes,
            content_length: 0,
            start_pos: 0,
            total_size: 0,
            have_content: false,
            connection_close: false,
            ranges_denied: false,
            location: None,
            last_modified: None,
        }
    }
}

/// Buffered reader over a [`MethodFd`], because responses interleave
/// line-framed headers with raw body bytes on the same stream.
pub struct WireReader {
    buffer: Vec<u8>,
    timeout: Duration,
}

impl WireReader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            timeout,
        }
    }

    fn fill(&mut self, fd: &mut dyn MethodFd) -> Result<usize> {
        if !fd.has_pending() {
            wait_fd(fd.raw_fd(), false, self.timeout)?;
        }
        let mut chunk = [0u8; 16 * 1024];
        let got = fd.read(&mut chunk)?;
        self.buffer.extend_from_slice(&chunk[..got]);
        Ok(got)
    }

    /// One CRLF (or bare LF) terminated line, without the terminator.
    pub fn read_line(&mut self, fd: &mut dyn MethodFd) -> Result<String> {
        loop {
            if let Some(nl) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=nl).collect();
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.fill(fd)? == 0 {
                return Err(AcquireError::Protocol(
                    "connection closed mid-header".into(),
                ));
            }
        }
    }

    /// Up to `want` body bytes; 0 at end of stream.
    pub fn read_body(&mut self, fd: &mut dyn MethodFd, out: &mut [u8]) -> Result<usize> {
        if self.buffer.is_empty() {
            if self.fill(fd)? == 0 {
                return Ok(0);
            }
        }
        let take = out.len().min(self.buffer.len());
        out[..take].copy_from_slice(&self.buffer[..take]);
        self.buffer.drain(..take);
        Ok(take)
    }

    pub fn discard(&mut self) {
        self.buffer.clear();
    }
}

/// Read and parse one response header block.
pub fn read_response(reader: &mut WireReader, fd: &mut dyn MethodFd) -> Result<Response> {
    let mut status_line = reader.read_line(fd)?;
    // tolerate stray blank lines between pipelined responses
    while status_line.is_empty() {
        status_line = reader.read_line(fd)?;
    }

    let mut response = Response::default();
    let rest = status_line
        .strip_prefix("HTTP/")
        .ok_or_else(|| AcquireError::Protocol(format!("bad status line: {status_line}")))?;
    let mut parts = rest.splitn(2, ' ');
    let version = parts.next().unwrap_or("");
    let mut vparts = version.splitn(2, '.');
    response.major = vparts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
    response.minor = vparts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    response.status = parts
        .next()
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AcquireError::Protocol(format!("bad status line: {status_line}")))?;

    // HTTP/1.0 defaults to one response per connection
    response.encoding = Encoding::Closes;
    let mut saw_length = false;

    loop {
        let line = reader.read_line(fd)?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(AcquireError::Protocol(format!("bad header line: {line}")));
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            if value.eq_ignore_ascii_case("chunked") {
                response.encoding = Encoding::Chunked;
                response.have_content = true;
            }
        } else if name.eq_ignore_ascii_case("Content-Length") {
            if response.encoding != Encoding::Chunked {
                response.encoding = Encoding::Stream;
            }
            response.content_length = value.parse().map_err(|_| {
                AcquireError::Protocol(format!("unparseable Content-Length: {value}"))
            })?;
            response.have_content = response.have_content || response.content_length > 0;
            saw_length = true;
        } else if name.eq_ignore_ascii_case("Content-Range") {
            // bytes start-end/total
            let spec = value.strip_prefix("bytes ").unwrap_or(value);
            if let Some((range, total)) = spec.split_once('/') {
                response.total_size = total.parse().unwrap_or(0);
                if let Some((start, _)) = range.split_once('-') {
                    response.start_pos = start.parse().unwrap_or(0);
                }
            }
            response.have_content = true;
        } else if name.eq_ignore_ascii_case("Connection") {
            if value.eq_ignore_ascii_case("close") {
                response.connection_close = true;
            }
        } else if name.eq_ignore_ascii_case("Accept-Ranges") {
            if value.eq_ignore_ascii_case("none") {
                response.ranges_denied = true;
            }
        } else if name.eq_ignore_ascii_case("Location") {
            response.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Last-Modified") {
            response.last_modified = parse_rfc1123(value);
        }
    }

    if response.encoding == Encoding::Closes {
        response.have_content = true;
        response.connection_close = true;
    }
    if saw_length && response.content_length == 0 && response.encoding == Encoding::Stream {
        response.have_content = false;
    }
    Ok(response)
}

/// Stream one response body into `sink` according to its encoding.
/// A connection that dies mid-body is a protocol (transient) error.
pub fn read_body(
    reader: &mut WireReader,
    fd: &mut dyn MethodFd,
    response: &Response,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buf = [0u8; 16 * 1024];
    match response.encoding {
        Encoding::Stream => {
            let mut remaining = response.content_length;
            while remaining > 0 {
                let want = buf.len().min(remaining as usize);
                let got = reader.read_body(fd, &mut buf[..want])?;
                if got == 0 {
                    return Err(AcquireError::Protocol(format!(
                        "connection died with {remaining} body bytes missing"
                    )));
                }
                sink(&buf[..got])?;
                remaining -= got as u64;
            }
        }
        Encoding::Closes => loop {
            let got = reader.read_body(fd, &mut buf)?;
            if got == 0 {
                break;
            }
            sink(&buf[..got])?;
        },
        Encoding::Chunked => loop {
            let size_line = reader.read_line(fd)?;
            let size_field = size_line.split(';').next().unwrap_or("").trim();
            let size = u64::from_str_radix(size_field, 16).map_err(|_| {
                AcquireError::Protocol(format!("bad chunk size: {size_line}"))
            })?;
            if size == 0 {
                // trailer section runs to a blank line
                loop {
                    if reader.read_line(fd)?.is_empty() {
                        break;
                    }
                }
                break;
            }
            let mut remaining = size;
            while remaining > 0 {
                let want = buf.len().min(remaining as usize);
                let got = reader.read_body(fd, &mut buf[..want])?;
                if got == 0 {
                    return Err(AcquireError::Protocol("truncated chunked body".into()));
                }
                sink(&buf[..got])?;
                remaining -= got as u64;
            }
            let sep = reader.read_line(fd)?;
            if !sep.is_empty() {
                return Err(AcquireError::Protocol(format!(
                    "chunk not followed by CRLF but {sep:?}"
                )));
            }
        },
    }
    Ok(())
}
