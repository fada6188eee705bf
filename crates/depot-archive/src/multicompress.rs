use std::path::{Path, PathBuf};

use depot_hashes::{HashKind, HashString, MultiHasher};
use depot_io::{BufFile, Compressor, CompressorRegistry, Mode, OpenOptions};

use crate::error::Result;

/// One input stream fanned out to a set of codecs. The canonical
/// uncompressed bytes are hashed once with MD5; at finish, outputs
/// whose compressed bytes equal the files already on disk are thrown
/// away so unchanged indices keep their mtimes.
pub struct MultiCompress {
    targets: Vec<Target>,
    md5: MultiHasher,
    uncompressed: u64,
}

struct Target {
    /// the real output location
    path: PathBuf,
    /// where the new bytes are staged
    staged: PathBuf,
    file: BufFile,
}

/// What one regeneration did.
#[derive(Debug)]
pub struct CompressReport {
    pub md5: Option<HashString>,
    pub uncompressed_size: u64,
    pub replaced: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

impl MultiCompress {
    /// `specs` name registry entries (`.` for the uncompressed copy,
    /// `gzip`, `xz`, …); each produces `base` plus its extension.
    pub fn new(base: &Path, specs: &[&str], registry: &CompressorRegistry) -> Result<MultiCompress> {
        let mut targets = Vec::new();
        for spec in specs {
            let Some(compressor) = registry.find_by_name(spec) else {
                tracing::warn!(spec, "unknown compressor, skipping output");
                continue;
            };
            let path = appended(base, &compressor.extension);
            let staged = appended(&path, ".new");
            let file = open_staged(&staged, compressor)?;
            targets.push(Target { path, staged, file });
        }
        Ok(MultiCompress {
            targets,
            md5: MultiHasher::from_mask(HashKind::Md5.mask_bit()),
            uncompressed: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.md5.add(data);
        self.uncompressed += data.len() as u64;
        for target in &mut self.targets {
            target.file.write_all(data)?;
        }
        Ok(())
    }

    /// Close every codec, then keep or swap each output depending on
    /// whether its bytes changed.
    pub fn finish(self) -> Result<CompressReport> {
        let mut report = CompressReport {
            md5: self.md5.result().find(HashKind::Md5).cloned(),
            uncompressed_size: self.uncompressed,
            replaced: Vec::new(),
            unchanged: Vec::new(),
        };
        for mut target in self.targets {
            target.file.close()?;
            if same_bytes(&target.path, &target.staged)? {
                std::fs::remove_file(&target.staged)?;
                report.unchanged.push(target.path);
            } else {
                std::fs::rename(&target.staged, &target.path)?;
                report.replaced.push(target.path);
            }
        }
        Ok(report)
    }
}

fn open_staged(staged: &Path, compressor: &Compressor) -> Result<BufFile> {
    Ok(BufFile::open_compressor(
        staged,
        Mode::WriteOnly,
        OpenOptions::new().create(true).empty(true),
        compressor,
    )?)
}

fn appended(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Compressed-byte comparison via MD5 of both files.
fn same_bytes(old: &Path, new: &Path) -> Result<bool> {
    if !old.exists() {
        return Ok(false);
    }
    let digest = |path: &Path| -> Result<_> {
        let mut hasher = MultiHasher::from_mask(HashKind::Md5.mask_bit());
        hasher.add_file(&mut std::fs::File::open(path)?, None)?;
        Ok(hasher.result())
    };
    Ok(digest(old)? == digest(new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_io::CompressMode;

    fn registry() -> CompressorRegistry {
        CompressorRegistry::builtin()
    }

    fn generate(base: &Path, content: &[u8]) -> CompressReport {
        let registry = registry();
        let mut multi = MultiCompress::new(base, &[".", "gzip", "zstd"], &registry).unwrap();
        multi.write(content).unwrap();
        multi.finish().unwrap()
    }

    #[test]
    fn produces_every_requested_codec() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Packages");
        let report = generate(&base, b"Package: demo\n");

        assert_eq!(report.replaced.len(), 3);
        assert_eq!(report.uncompressed_size, 14);
        assert!(base.exists());
        assert!(appended(&base, ".gz").exists());
        assert!(appended(&base, ".zst").exists());
        assert!(!appended(&base, ".new").exists());

        // each compressed sibling decompresses to the canonical bytes
        let registry = registry();
        for name in ["Packages.gz", "Packages.zst"] {
            let mut input = BufFile::open_with(
                dir.path().join(name),
                Mode::ReadOnly,
                OpenOptions::new(),
                CompressMode::Extension,
                &registry,
            )
            .unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = input.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            assert_eq!(buf, b"Package: demo\n", "{name}");
        }
    }

    #[test]
    fn unchanged_regeneration_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Packages");

        generate(&base, b"Package: demo\n");
        let mtime_before = std::fs::metadata(&base).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let report = generate(&base, b"Package: demo\n");
        assert_eq!(report.replaced.len(), 0);
        assert_eq!(report.unchanged.len(), 3);
        assert_eq!(
            std::fs::metadata(&base).unwrap().modified().unwrap(),
            mtime_before
        );

        // content change swaps the outputs again
        let report = generate(&base, b"Package: demo\nVersion: 2\n");
        assert_eq!(report.replaced.len(), 3);
    }
}
