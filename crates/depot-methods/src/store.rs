//! Transcode between compression formats while hashing the canonical
//! uncompressed stream once.
//!
//! Invoked as `store` the input codec is picked by extension; invoked
//! through a codec-named symlink (`gzip`, `xz`, `zstd`, …) that codec
//! reads the input regardless of its name.

use depot_acquire::{
    AcquireError, Capabilities, FetchItem, FetchResult, MethodHandler, MethodIo, Result,
};
use depot_hashes::MultiHasher;
use depot_io::{BufFile, CompressMode, CompressorRegistry, Mode, OpenOptions};
use depot_util::Uri;

pub struct StoreMethod {
    binary: String,
}

impl StoreMethod {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities::new("store", "1.2")
            .single_instance()
            .send_config()
    }

    fn open_source(
        &self,
        path: &std::path::Path,
        registry: &CompressorRegistry,
    ) -> Result<BufFile> {
        if self.binary == "store" {
            return Ok(BufFile::open_with(
                path,
                Mode::ReadOnly,
                OpenOptions::new(),
                CompressMode::Extension,
                registry,
            )?);
        }
        let compressor = registry.find_by_name(&self.binary).ok_or_else(|| {
            AcquireError::Other(format!(
                "extraction of {} requires unknown compressor {}",
                path.display(),
                self.binary
            ))
        })?;
        Ok(BufFile::open_compressor(
            path,
            Mode::ReadOnly,
            OpenOptions::new(),
            compressor,
        )?)
    }
}

impl MethodHandler for StoreMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        let get = Uri::parse(&item.uri);
        let path = std::path::PathBuf::from(format!("{}{}", get.host, get.path));
        let registry = CompressorRegistry::from_config(&io.config);

        io.uri_start(item, None, None, 0)?;

        let mut from = self.open_source(&path, &registry)?;
        // an empty compressed input cannot be a valid archive
        let (source_codec, _) = registry.detect_by_extension(&path);
        if source_codec.name != "." && std::fs::metadata(&path)?.len() == 0 {
            return Err(AcquireError::Other(
                "empty files can't be valid archives".into(),
            ));
        }

        let mut to = if item.dest_file != path && item.dest_file.as_os_str() != "/dev/null" {
            Some(BufFile::open_with(
                &item.dest_file,
                Mode::WriteOnly,
                OpenOptions::new().create(true).atomic(true).del_on_fail(true),
                CompressMode::Extension,
                &registry,
            )?)
        } else {
            None
        };

        let mut hasher = if item.expected_hashes.is_empty() {
            MultiHasher::new()
        } else {
            MultiHasher::for_list(&item.expected_hashes)
        };

        let mut buf = [0u8; 4096];
        loop {
            let got = match from.read(&mut buf) {
                Ok(got) => got,
                Err(error) => {
                    if let Some(out) = to.as_mut() {
                        out.op_fail();
                    }
                    return Err(error.into());
                }
            };
            if got == 0 {
                break;
            }
            hasher.add(&buf[..got]);
            if let Some(out) = to.as_mut() {
                out.write_all(&buf[..got])?;
            }
        }
        from.close()?;
        if let Some(mut out) = to.take() {
            out.close()?;
            if let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) {
                depot_io::set_file_mtime(&item.dest_file, modified)?;
            }
        }

        let mut result = FetchResult {
            filename: item.dest_file.clone(),
            ..FetchResult::default()
        };
        result.take_hashes(hasher);
        io.uri_done(item, &result)
    }
}
