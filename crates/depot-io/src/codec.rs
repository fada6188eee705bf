use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use crate::backend::Backend;
use crate::error::{IoError, Result};
use crate::registry::CodecKind;

fn codec_err<E: std::fmt::Display>(e: E) -> IoError {
    IoError::Codec(e.to_string())
}

enum Decoder {
    /// Empty source files decompress to nothing for every codec.
    Empty,
    Gzip(flate2::read::MultiGzDecoder<File>),
    Bzip2(bzip2::read::MultiBzDecoder<File>),
    Xz(xz2::read::XzDecoder<File>),
    Lzma(xz2::read::XzDecoder<File>),
    Lz4(lz4_flex::frame::FrameDecoder<File>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
}

impl Decoder {
    fn new(kind: CodecKind, file: File) -> Result<Decoder> {
        if file.metadata()?.len() == 0 {
            return Ok(Decoder::Empty);
        }
        Ok(match kind {
            CodecKind::Gzip => Decoder::Gzip(flate2::read::MultiGzDecoder::new(file)),
            CodecKind::Bzip2 => Decoder::Bzip2(bzip2::read::MultiBzDecoder::new(file)),
            CodecKind::Xz => Decoder::Xz(xz2::read::XzDecoder::new_multi_decoder(file)),
            CodecKind::Lzma => {
                let stream =
                    xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(codec_err)?;
                Decoder::Lzma(xz2::read::XzDecoder::new_stream(file, stream))
            }
            CodecKind::Lz4 => Decoder::Lz4(lz4_flex::frame::FrameDecoder::new(file)),
            CodecKind::Zstd => {
                Decoder::Zstd(zstd::stream::read::Decoder::new(file).map_err(codec_err)?)
            }
            CodecKind::Identity | CodecKind::Piped => {
                return Err(IoError::Codec("not a built-in codec".to_string()))
            }
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Decoder::Empty => Ok(0),
            Decoder::Gzip(d) => d.read(buf),
            Decoder::Bzip2(d) => d.read(buf),
            Decoder::Xz(d) | Decoder::Lzma(d) => d.read(buf),
            Decoder::Lz4(d) => d.read(buf),
            Decoder::Zstd(d) => d.read(buf),
        }
    }
}

/// Read side of a compressed file. The raw descriptor is an owned
/// duplicate, so backwards seeks can rewind it and re-stream without
/// touching a descriptor the caller may still hold.
pub(crate) struct CodecReader {
    kind: CodecKind,
    raw: File,
    decoder: Decoder,
    pos: u64,
}

impl CodecReader {
    pub(crate) fn open(kind: CodecKind, raw: File) -> Result<Self> {
        let decoder = Decoder::new(kind, raw.try_clone()?)?;
        Ok(Self {
            kind,
            raw,
            decoder,
            pos: 0,
        })
    }

    fn restart(&mut self) -> Result<()> {
        self.raw.seek(SeekFrom::Start(0))?;
        self.decoder = Decoder::new(self.kind, self.raw.try_clone()?)?;
        self.pos = 0;
        Ok(())
    }
}

impl Backend for CodecReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.decoder.read(buf) {
                Ok(n) => {
                    self.pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::Codec(e.to_string())),
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
            self.restart()?;
        }
        let ahead = pos - self.pos;
        self.skip(ahead)
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
        // count a second stream so the active one keeps its position
        let mut probe = Decoder::new(self.kind, {
            let mut file = self.raw.try_clone()?;
            file.seek(SeekFrom::Start(0))?;
            file
        })?;
        let mut total = 0u64;
        let mut scratch = [0u8; 16 * 1024];
        loop {
            let got = probe.read(&mut scratch).map_err(|e| IoError::Codec(e.to_string()))?;
            if got == 0 {
                return Ok(total);
            }
            total += got as u64;
        }
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Encoder {
    Gzip(flate2::write::GzEncoder<File>),
    Bzip2(bzip2::write::BzEncoder<File>),
    Xz(xz2::write::XzEncoder<File>),
    Lzma(xz2::write::XzEncoder<File>),
    Lz4(Box<lz4_flex::frame::FrameEncoder<File>>),
    Zstd(zstd::stream::write::Encoder<'static, File>),
}

impl Encoder {
    fn new(kind: CodecKind, file: File) -> Result<Encoder> {
        Ok(match kind {
            CodecKind::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::default(),
            )),
            CodecKind::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                file,
                bzip2::Compression::default(),
            )),
            CodecKind::Xz => Encoder::Xz(xz2::write::XzEncoder::new(file, 6)),
            CodecKind::Lzma => {
                let options = xz2::stream::LzmaOptions::new_preset(6).map_err(codec_err)?;
                let stream =
                    xz2::stream::Stream::new_lzma_encoder(&options).map_err(codec_err)?;
                Encoder::Lzma(xz2::write::XzEncoder::new_stream(file, stream))
            }
            CodecKind::Lz4 => {
                Encoder::Lz4(Box::new(lz4_flex::frame::FrameEncoder::new(file)))
            }
            CodecKind::Zstd => {
                Encoder::Zstd(zstd::stream::write::Encoder::new(file, 0).map_err(codec_err)?)
            }
            CodecKind::Identity | CodecKind::Piped => {
                return Err(IoError::Codec("not a built-in codec".to_string()))
            }
        })
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Bzip2(e) => e.write(buf),
            Encoder::Xz(e) | Encoder::Lzma(e) => e.write(buf),
            Encoder::Lz4(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.flush(),
            Encoder::Bzip2(e) => e.flush(),
            Encoder::Xz(e) | Encoder::Lzma(e) => e.flush(),
            Encoder::Lz4(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }

    fn finish(self) -> Result<File> {
        match self {
            Encoder::Gzip(e) => e.finish().map_err(IoError::WriteError),
            Encoder::Bzip2(e) => e.finish().map_err(IoError::WriteError),
            Encoder::Xz(e) | Encoder::Lzma(e) => e.finish().map_err(IoError::WriteError),
            Encoder::Lz4(e) => e.finish().map_err(codec_err),
            Encoder::Zstd(e) => e.finish().map_err(IoError::WriteError),
        }
    }
}

/// Write side of a compressed file. Compressed streams only grow
/// forward; any attempt to reposition reports [`IoError::SeekNotSupported`].
pub(crate) struct CodecWriter {
    encoder: Option<Encoder>,
    pos: u64,
}

impl CodecWriter {
    pub(crate) fn create(kind: CodecKind, file: File) -> Result<Self> {
        Ok(Self {
            encoder: Some(Encoder::new(kind, file)?),
            pos: 0,
        })
    }
}

impl Backend for CodecWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(IoError::ReadError(std::io::Error::other(
            "stream opened write-only",
        )))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let encoder = self.encoder.as_mut().ok_or(IoError::Closed)?;
        loop {
            match encoder.write(buf) {
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
        let encoder = self.encoder.as_mut().ok_or(IoError::Closed)?;
        encoder.flush().map_err(IoError::WriteError)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos == self.pos {
            return Ok(());
        }
        Err(IoError::SeekNotSupported)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        Err(IoError::SeekNotSupported)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        if len == self.pos {
            return Ok(());
        }
        Err(IoError::SeekNotSupported)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let mut file = encoder.finish()?;
            file.flush().map_err(IoError::WriteError)?;
        }
        Ok(())
    }
}
