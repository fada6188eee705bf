use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{IoError, Result};

/// The capability set a stream backend offers to [`BufFile`](crate::BufFile).
/// Positions are always in the uncompressed byte stream.
pub(crate) trait Backend: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;
    fn seek(&mut self, pos: u64) -> Result<()>;
    fn skip(&mut self, n: u64) -> Result<()>;
    fn truncate(&mut self, len: u64) -> Result<()>;
    fn tell(&mut self) -> Result<u64>;
    fn size(&mut self) -> Result<u64>;
    fn close(&mut self) -> Result<()>;

    /// Stream backends cannot be repositioned freely in write mode.
    fn stream_only(&self) -> bool {
        true
    }
}

/// Raw pread/pwrite-style access to a plain file.
pub(crate) struct Direct {
    file: File,
}

impl Direct {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }
}

impl Backend for Direct {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::ReadError(e)),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.file.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::WriteError(e)),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(IoError::WriteError)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(IoError::from)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Current(n as i64))
            .map(|_| ())
            .map_err(IoError::from)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len).map_err(IoError::from)
    }

    fn tell(&mut self) -> Result<u64> {
        self.file.stream_position().map_err(IoError::from)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush().map_err(IoError::WriteError)
    }

    fn stream_only(&self) -> bool {
        false
    }
}
