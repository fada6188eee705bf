use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::backend::Backend;
use crate::error::{IoError, Result};
use crate::registry::Compressor;

fn spawn(
    compressor: &Compressor,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child> {
    Command::new(&compressor.binary)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| IoError::Codec(format!("cannot run {}: {e}", compressor.binary)))
}

fn reap(child: &mut Child, binary: &str) -> Result<()> {
    let status = child
        .wait()
        .map_err(|e| IoError::Codec(format!("wait on {binary}: {e}")))?;
    if !status.success() {
        return Err(IoError::CompressorExit {
            binary: binary.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Decompression through an external binary: the compressed file is the
/// child's stdin, its stdout is our data stream.
pub(crate) struct PipedReader {
    compressor: Compressor,
    raw: File,
    child: Option<(Child, ChildStdout)>,
    pos: u64,
}

impl PipedReader {
    pub(crate) fn open(compressor: &Compressor, raw: File) -> Result<Self> {
        let mut reader = Self {
            compressor: compressor.clone(),
            raw,
            child: None,
            pos: 0,
        };
        reader.respawn()?;
        Ok(reader)
    }

    fn respawn(&mut self) -> Result<()> {
        self.reap_current()?;
        self.raw.seek(SeekFrom::Start(0))?;
        self.pos = 0;

        // a zero-length regular file decompresses to nothing without
        // paying for a child process
        if self.raw.metadata()?.is_file() && self.raw.metadata()?.len() == 0 {
            return Ok(());
        }

        let mut child = spawn(
            &self.compressor,
            &self.compressor.decompress_args,
            Stdio::from(self.raw.try_clone()?),
            Stdio::piped(),
        )?;
        let stdout = child.stdout.take().ok_or_else(|| {
            IoError::Codec(format!("no stdout from {}", self.compressor.binary))
        })?;
        self.child = Some((child, stdout));
        Ok(())
    }

    fn reap_current(&mut self) -> Result<()> {
        if let Some((mut child, stdout)) = self.child.take() {
            drop(stdout);
            let _ = child.kill();
            let _ = child.wait();
        }
        Ok(())
    }
}

impl Backend for PipedReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some((_, stdout)) = self.child.as_mut() else {
            return Ok(0);
        };
        loop {
            match stdout.read(buf) {
                Ok(n) => {
                    self.pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::ReadError(e)),
            }
        }
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(IoError::WriteError(std::io::Error::other(
            "stream opened read-only",
        )))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos < self.pos {
            self.respawn()?;
        }
        self.skip(pos - self.pos)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        let mut scratch = [0u8; 8192];
        while remaining > 0 {
            let want = scratch.len().min(remaining as usize);
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                return Err(IoError::UnexpectedEof {
                    expected: remaining as usize,
                });
            }
            remaining -= got as u64;
        }
        Ok(())
    }

    fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(IoError::SeekNotSupported)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn size(&mut self) -> Result<u64> {
        Err(IoError::SeekNotSupported)
    }

    fn close(&mut self) -> Result<()> {
        if let Some((mut child, stdout)) = self.child.take() {
            drop(stdout);
            reap(&mut child, &self.compressor.binary)?;
        }
        Ok(())
    }
}

/// Compression through an external binary: we feed the child's stdin,
/// its stdout is the destination file.
pub(crate) struct PipedWriter {
    compressor: Compressor,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pos: u64,
}

impl PipedWriter {
    pub(crate) fn create(compressor: &Compressor, dest: File) -> Result<Self> {
        let mut child = spawn(
            compressor,
            &compressor.compress_args,
            Stdio::piped(),
            Stdio::from(dest),
        )?;
        let stdin = child.stdin.take().ok_or_else(|| {
            IoError::Codec(format!("no stdin to {}", compressor.binary))
        })?;
        Ok(Self {
            compressor: compressor.clone(),
            child: Some(child),
            stdin: Some(stdin),
            pos: 0,
        })
    }
}

impl Backend for PipedWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(IoError::ReadError(std::io::Error::other(
            "stream opened write-only",
        )))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stdin = self.stdin.as_mut().ok_or(IoError::Closed)?;
        loop {
            match stdin.write(buf) {
                Ok(n) => {
                    self.pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::WriteError(e)),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush().map_err(IoError::WriteError),
            None => Ok(()),
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos == self.pos {
            return Ok(());
        }
        Err(IoError::SeekNotSupported)
    }

    fn skip(&mut self, _n: u64) -> Result<()> {
        Err(IoError::SeekNotSupported)
    }

    fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(IoError::SeekNotSupported)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn close(&mut self) -> Result<()> {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            reap(&mut child, &self.compressor.binary)?;
        }
        Ok(())
    }
}

impl Drop for PipedReader {
    fn drop(&mut self) {
        let _ = self.reap_current();
    }
}

impl Drop for PipedWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}
