use std::fs::File;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::backend::{Backend, Direct};
use crate::codec::{CodecReader, CodecWriter};
use crate::error::{IoError, Result};
use crate::piped::{PipedReader, PipedWriter};
use crate::registry::{CodecKind, Compressor, CompressorRegistry};

const WRITE_BUFFER: usize = 4096;
const READ_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// How a codec is chosen when opening a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressMode {
    /// Raw bytes, no codec.
    #[default]
    None,
    /// Probe `path + extension` per registry entry, cheapest first.
    Auto,
    /// Decide by the path's trailing extension (`.new`/`.bak` peeled).
    Extension,
}

/// Open-time options beyond the basic [`Mode`], builder style.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    create: bool,
    exclusive: bool,
    empty: bool,
    atomic: bool,
    replace: bool,
    buffered_write: bool,
    del_on_fail: bool,
    perms: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            exclusive: false,
            empty: false,
            atomic: false,
            replace: false,
            buffered_write: false,
            del_on_fail: false,
            perms: 0o644,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }
    pub fn exclusive(mut self, yes: bool) -> Self {
        self.exclusive = yes;
        self
    }
    /// Truncate an existing file on open.
    pub fn empty(mut self, yes: bool) -> Self {
        self.empty = yes;
        self
    }
    /// Write into a hidden temp sibling, rename over the target on a
    /// successful close. Implies create+exclusive semantics.
    pub fn atomic(mut self, yes: bool) -> Self {
        self.atomic = yes;
        self
    }
    /// Write `path.new` and rename over `path` on close.
    pub fn replace(mut self, yes: bool) -> Self {
        self.replace = yes;
        self
    }
    pub fn buffered_write(mut self, yes: bool) -> Self {
        self.buffered_write = yes;
        self
    }
    /// Remove the output again when the handle failed before close.
    pub fn del_on_fail(mut self, yes: bool) -> Self {
        self.del_on_fail = yes;
        self
    }
    pub fn perms(mut self, mode: u32) -> Self {
        self.perms = mode;
        self
    }
}

enum Finalize {
    Plain,
    /// Rename the temp sibling over the destination on close.
    Atomic {
        temp: Option<NamedTempFile>,
        dest: PathBuf,
    },
    /// Rename `dest.new` over `dest` on close.
    Replace {
        staged: PathBuf,
        dest: PathBuf,
    },
}

/// A buffered stream over a raw file or a compression codec with
/// uniform read/write/seek semantics. Failed operations latch the
/// handle into an error state until [`BufFile::clear_fail`].
pub struct BufFile {
    backend: Option<Box<dyn Backend>>,
    path: Option<PathBuf>,
    mode: Mode,
    buf: Vec<u8>,
    buf_pos: usize,
    write_buf: Vec<u8>,
    buffered_write: bool,
    del_on_fail: bool,
    limit: Option<u64>,
    pos: u64,
    fail: bool,
    hit_eof: bool,
    finalize: Finalize,
}

fn current_umask() -> u32 {
    // the only portable read is a write; restore immediately
    let mask = unsafe { libc::umask(0) };
    unsafe { libc::umask(mask) };
    mask as u32
}

impl BufFile {
    /// Open `path` without any codec.
    pub fn open(path: impl AsRef<Path>, mode: Mode, options: OpenOptions) -> Result<BufFile> {
        let registry = CompressorRegistry::builtin();
        Self::open_with(path, mode, options, CompressMode::None, &registry)
    }

    /// Open `path`, choosing a codec per `compress` against `registry`.
    pub fn open_with(
        path: impl AsRef<Path>,
        mode: Mode,
        options: OpenOptions,
        compress: CompressMode,
        registry: &CompressorRegistry,
    ) -> Result<BufFile> {
        let path = path.as_ref();
        let (compressor, real_path) = match compress {
            CompressMode::None => (registry.identity().clone(), path.to_path_buf()),
            CompressMode::Extension => {
                let (c, p) = registry.detect_by_extension(path);
                (c.clone(), p)
            }
            CompressMode::Auto => {
                if mode == Mode::ReadOnly {
                    let (c, p) = registry.detect_auto(path).ok_or_else(|| IoError::Open {
                        path: path.to_path_buf(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    })?;
                    (c.clone(), p)
                } else {
                    let (c, p) = registry.detect_by_extension(path);
                    (c.clone(), p)
                }
            }
        };
        Self::open_compressor(&real_path, mode, options, &compressor)
    }

    /// Open `path` through a specific compressor entry.
    pub fn open_compressor(
        path: &Path,
        mode: Mode,
        options: OpenOptions,
        compressor: &Compressor,
    ) -> Result<BufFile> {
        if options.atomic || options.replace {
            return Self::open_staged(path, mode, options, compressor);
        }

        let mut std_options = std::fs::OpenOptions::new();
        match mode {
            Mode::ReadOnly => std_options.read(true),
            Mode::WriteOnly => std_options.write(true),
            Mode::ReadWrite => std_options.read(true).write(true),
        };
        std_options
            .create(options.create)
            .create_new(options.exclusive)
            .truncate(options.empty && mode != Mode::ReadOnly)
            .mode(options.perms);
        let file = std_options.open(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let backend = Self::wrap(file, mode, compressor)?;
        Ok(Self::assemble(
            backend,
            Some(path.to_path_buf()),
            mode,
            &options,
            Finalize::Plain,
        ))
    }

    fn open_staged(
        path: &Path,
        mode: Mode,
        options: OpenOptions,
        compressor: &Compressor,
    ) -> Result<BufFile> {
        if mode == Mode::ReadOnly {
            return Err(IoError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::other("staged modes are write-only"),
            });
        }

        if options.atomic {
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let stem = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("buffile");
            let temp = tempfile::Builder::new()
                .prefix(&format!("{stem}."))
                .rand_bytes(6)
                .tempfile_in(parent)
                .map_err(|source| IoError::Open {
                    path: path.to_path_buf(),
                    source,
                })?;

            let perms = options.perms & !current_umask();
            nix::sys::stat::fchmod(
                temp.as_file(),
                nix::sys::stat::Mode::from_bits_truncate(perms),
            )
            .map_err(|e| IoError::Io(std::io::Error::from(e)))?;

            let file = temp.as_file().try_clone()?;
            let backend = Self::wrap(file, mode, compressor)?;
            return Ok(Self::assemble(
                backend,
                Some(path.to_path_buf()),
                mode,
                &options,
                Finalize::Atomic {
                    temp: Some(temp),
                    dest: path.to_path_buf(),
                },
            ));
        }

        // Replace: stage under a well-known sibling name
        let staged = {
            let mut s = path.as_os_str().to_os_string();
            s.push(".new");
            PathBuf::from(s)
        };
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(options.perms)
            .open(&staged)
            .map_err(|source| IoError::Open {
                path: staged.clone(),
                source,
            })?;
        let backend = Self::wrap(file, mode, compressor)?;
        Ok(Self::assemble(
            backend,
            Some(path.to_path_buf()),
            mode,
            &options,
            Finalize::Replace {
                staged,
                dest: path.to_path_buf(),
            },
        ))
    }

    /// Layer a handle over an already opened descriptor.
    pub fn open_fd(file: File, mode: Mode, compressor: Option<&Compressor>) -> Result<BufFile> {
        let registry = CompressorRegistry::builtin();
        let compressor = compressor.unwrap_or_else(|| registry.identity());
        let backend = Self::wrap(file, mode, compressor)?;
        Ok(Self::assemble(
            backend,
            None,
            mode,
            &OpenOptions::default(),
            Finalize::Plain,
        ))
    }

    fn wrap(file: File, mode: Mode, compressor: &Compressor) -> Result<Box<dyn Backend>> {
        Ok(match (compressor.kind, mode) {
            (CodecKind::Identity, _) => Box::new(Direct::new(file)),
            (_, Mode::ReadWrite) => {
                return Err(IoError::Codec(
                    "compressed streams cannot be opened read-write".to_string(),
                ))
            }
            (CodecKind::Piped, Mode::ReadOnly) => {
                Box::new(PipedReader::open(compressor, file)?)
            }
            (CodecKind::Piped, Mode::WriteOnly) => {
                Box::new(PipedWriter::create(compressor, file)?)
            }
            (kind, Mode::ReadOnly) => Box::new(CodecReader::open(kind, file)?),
            (kind, Mode::WriteOnly) => Box::new(CodecWriter::create(kind, file)?),
        })
    }

    fn assemble(
        backend: Box<dyn Backend>,
        path: Option<PathBuf>,
        mode: Mode,
        options: &OpenOptions,
        finalize: Finalize,
    ) -> BufFile {
        BufFile {
            backend: Some(backend),
            path,
            mode,
            buf: Vec::new(),
            buf_pos: 0,
            write_buf: Vec::new(),
            buffered_write: options.buffered_write,
            del_on_fail: options.del_on_fail,
            limit: None,
            pos: 0,
            fail: false,
            hit_eof: false,
            finalize,
        }
    }

    fn backend(&mut self) -> Result<&mut Box<dyn Backend>> {
        if self.fail {
            return Err(IoError::Failed);
        }
        self.backend.as_mut().ok_or(IoError::Closed)
    }

    fn mark_fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.fail = true;
        }
        result
    }

    /// Cap how many more bytes may be read from the current position.
    pub fn limit(&mut self, n: u64) {
        self.limit = Some(n);
    }

    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.fail {
            return Err(IoError::Failed);
        }
        let mut allowed = out.len();
        if let Some(limit) = self.limit {
            allowed = allowed.min(limit as usize);
            if allowed == 0 {
                self.hit_eof = true;
                return Ok(0);
            }
        }

        // drain buffered bytes first
        if self.buf_pos < self.buf.len() {
            let have = (self.buf.len() - self.buf_pos).min(allowed);
            out[..have].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + have]);
            self.buf_pos += have;
            self.advance(have as u64);
            return Ok(have);
        }

        let result = {
            let backend = self.backend()?;
            backend.read(&mut out[..allowed])
        };
        let got = self.mark_fail(result)?;
        if got == 0 {
            self.hit_eof = true;
        }
        self.advance(got as u64);
        Ok(got)
    }

    fn advance(&mut self, by: u64) {
        self.pos += by;
        if let Some(limit) = self.limit.as_mut() {
            *limit -= by.min(*limit);
        }
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < out.len() {
            let got = self.read(&mut out[done..])?;
            if got == 0 {
                self.fail = true;
                return Err(IoError::UnexpectedEof {
                    expected: out.len() - done,
                });
            }
            done += got;
        }
        Ok(())
    }

    /// Read one line including its terminating newline. Returns false
    /// at end of file with nothing appended.
    pub fn read_line(&mut self, out: &mut String) -> Result<bool> {
        let mut any = false;
        loop {
            if self.buf_pos >= self.buf.len() {
                if !self.fill()? {
                    return Ok(any);
                }
            }
            let slice = &self.buf[self.buf_pos..];
            match slice.iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    out.push_str(&String::from_utf8_lossy(&slice[..=nl]));
                    self.buf_pos += nl + 1;
                    self.advance((nl + 1) as u64);
                    return Ok(true);
                }
                None => {
                    out.push_str(&String::from_utf8_lossy(slice));
                    let taken = slice.len();
                    self.buf_pos += taken;
                    self.advance(taken as u64);
                    any = true;
                }
            }
        }
    }

    fn fill(&mut self) -> Result<bool> {
        let mut want = READ_BUFFER;
        if let Some(limit) = self.limit {
            want = want.min(limit as usize);
            if want == 0 {
                self.hit_eof = true;
                return Ok(false);
            }
        }
        self.buf.resize(want, 0);
        if self.fail {
            return Err(IoError::Failed);
        }
        let result = match self.backend.as_mut() {
            Some(backend) => backend.read(&mut self.buf[..want]),
            None => return Err(IoError::Closed),
        };
        let got = self.mark_fail(result)?;
        self.buf.truncate(got);
        self.buf_pos = 0;
        if got == 0 {
            self.hit_eof = true;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        if self.fail {
            return Err(IoError::Failed);
        }
        self.pos += data.len() as u64;
        if self.buffered_write {
            self.write_buf.extend_from_slice(data);
            if self.write_buf.len() >= WRITE_BUFFER {
                return self.drain_write_buf();
            }
            return Ok(());
        }
        while !data.is_empty() {
            let result = {
                let backend = self.backend()?;
                backend.write(data)
            };
            let n = self.mark_fail(result)?;
            data = &data[n..];
        }
        Ok(())
    }

    fn drain_write_buf(&mut self) -> Result<()> {
        let mut buffered = std::mem::take(&mut self.write_buf);
        let mut start = 0;
        while start < buffered.len() {
            let result = {
                let backend = self.backend()?;
                backend.write(&buffered[start..])
            };
            match result {
                Ok(n) => start += n,
                Err(e) => {
                    // keep the unwritten tail for a later retry
                    buffered.drain(..start);
                    self.write_buf = buffered;
                    self.fail = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.fail {
            return Err(IoError::Failed);
        }
        self.drain_write_buf()?;
        let result = {
            let backend = self.backend()?;
            backend.flush()
        };
        self.mark_fail(result)
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if self.fail {
            return Err(IoError::Failed);
        }
        if self.mode != Mode::ReadOnly {
            self.drain_write_buf()?;
        }
        self.buf.clear();
        self.buf_pos = 0;
        let result = {
            let backend = self.backend()?;
            backend.seek(pos)
        };
        self.mark_fail(result)?;
        self.pos = pos;
        self.hit_eof = false;
        self.limit = None;
        Ok(())
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.pos + n;
        self.seek(target)
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if self.fail {
            return Err(IoError::Failed);
        }
        self.drain_write_buf()?;
        let result = {
            let backend = self.backend()?;
            backend.truncate(len)
        };
        self.mark_fail(result)
    }

    /// Current position in the uncompressed stream.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Uncompressed size of the stream.
    pub fn size(&mut self) -> Result<u64> {
        if self.fail {
            return Err(IoError::Failed);
        }
        let result = {
            let backend = self.backend()?;
            backend.size()
        };
        self.mark_fail(result)
    }

    pub fn eof(&self) -> bool {
        self.hit_eof && self.buf_pos >= self.buf.len()
    }

    pub fn failed(&self) -> bool {
        self.fail
    }

    /// Latch the handle into the failed state, as callers do when an
    /// outer operation went wrong and staged output must not survive.
    pub fn op_fail(&mut self) {
        self.fail = true;
    }

    pub fn clear_fail(&mut self) {
        self.fail = false;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush, finish the codec and finalize staged outputs. A failed
    /// handle removes its staged output instead when `del_on_fail`.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };

        if self.fail {
            if self.del_on_fail {
                match std::mem::replace(&mut self.finalize, Finalize::Plain) {
                    Finalize::Atomic { temp, .. } => drop(temp),
                    Finalize::Replace { staged, .. } => {
                        let _ = std::fs::remove_file(staged);
                    }
                    Finalize::Plain => {
                        if let Some(path) = &self.path {
                            if self.mode != Mode::ReadOnly {
                                let _ = std::fs::remove_file(path);
                            }
                        }
                    }
                }
            }
            let _ = backend.close();
            return Err(IoError::Failed);
        }

        if self.mode != Mode::ReadOnly {
            self.backend = Some(backend);
            self.drain_write_buf()?;
            backend = self.backend.take().unwrap();
        }
        backend.close()?;

        match std::mem::replace(&mut self.finalize, Finalize::Plain) {
            Finalize::Plain => Ok(()),
            Finalize::Atomic { temp, dest } => {
                if let Some(temp) = temp {
                    temp.persist(&dest)
                        .map_err(|e| IoError::WriteError(e.error))?;
                }
                Ok(())
            }
            Finalize::Replace { staged, dest } => {
                std::fs::rename(&staged, &dest).map_err(IoError::WriteError)
            }
        }
    }
}

impl Drop for BufFile {
    fn drop(&mut self) {
        if self.backend.is_some() {
            let _ = self.close();
        }
    }
}

impl std::io::Read for BufFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        BufFile::read(self, buf).map_err(std::io::Error::other)
    }
}

impl std::io::Write for BufFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        BufFile::write_all(self, buf)
            .map(|()| buf.len())
            .map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        BufFile::flush(self).map_err(std::io::Error::other)
    }
}

/// Stream the remainder of `from` into `to`.
pub fn copy_file(from: &mut BufFile, to: &mut BufFile) -> Result<u64> {
    let mut total = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let got = from.read(&mut buf)?;
        if got == 0 {
            return Ok(total);
        }
        to.write_all(&buf[..got])?;
        total += got as u64;
    }
}

/// Stamp `path` with the given modification time, as fetchers do when a
/// server reported one.
pub fn set_file_mtime(path: &Path, mtime: std::time::SystemTime) -> Result<()> {
    let secs = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| IoError::Io(std::io::Error::other("mtime before epoch")))?;
    let times = [
        libc::timespec {
            tv_sec: secs.as_secs() as libc::time_t,
            tv_nsec: secs.subsec_nanos() as libc::c_long,
        },
        libc::timespec {
            tv_sec: secs.as_secs() as libc::time_t,
            tv_nsec: secs.subsec_nanos() as libc::c_long,
        },
    ];
    let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| IoError::Io(std::io::Error::other("path contains NUL")))?;
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(IoError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// File modification time, with nanosecond precision where available.
pub fn file_mtime(path: &Path) -> Result<std::time::SystemTime> {
    Ok(std::fs::metadata(path)?.modified()?)
}
