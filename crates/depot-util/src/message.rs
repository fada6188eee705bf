use std::io::{ErrorKind, Read};

/// Buffers a byte stream and yields complete messages, where a message
/// ends at a blank line (`\n\n`, `\r\n\r\n` or `\n\r\n`). Incomplete
/// tails stay buffered until more data arrives.
#[derive(Debug, Default)]
pub struct MessageReader {
    partial: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and collect every message completed by them.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<String>) {
        self.partial.extend_from_slice(data);

        loop {
            let Some((msg_end, boundary_end)) = find_blank_line(&self.partial) else {
                break;
            };
            let mut message = self.partial[..msg_end].to_vec();
            while matches!(message.last(), Some(b'\n' | b'\r')) {
                message.pop();
            }
            out.push(String::from_utf8_lossy(&message).into_owned());

            // swallow any further blank-line padding between messages
            let mut rest = boundary_end;
            while matches!(self.partial.get(rest), Some(b'\n' | b'\r')) {
                rest += 1;
            }
            self.partial.drain(..rest);
        }
    }

    /// True when a partial message is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// Locate the first blank-line boundary; returns the offset where the
/// message text ends and the offset just past the boundary.
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] != b'\n' {
            i += 1;
            continue;
        }
        match buf.get(i + 1) {
            Some(b'\n') => return Some((i, i + 2)),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, i + 3)),
            _ => i += 1,
        }
    }
    None
}

/// Drain complete messages from `fd` into `out`. Returns `Ok(false)`
/// iff the peer closed the stream; a would-block read leaves partial
/// data buffered and reports `Ok(true)`.
pub fn read_messages(
    fd: &mut impl Read,
    reader: &mut MessageReader,
    out: &mut Vec<String>,
) -> std::io::Result<bool> {
    let mut buf = [0u8; 64000];
    loop {
        match fd.read(&mut buf) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                reader.feed(&buf[..n], out);
                if !reader.has_pending() {
                    return Ok(true);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
            Err(e) => return Err(e),
        }
    }
}
