use std::path::{Path, PathBuf};

use depot_util::Configuration;
use once_cell::sync::Lazy;

/// The built-in codecs plus the escape hatch of an external binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Identity,
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Lz4,
    Zstd,
    Piped,
}

/// One entry of the compressor registry: how a codec is named, which
/// extension it claims and how to drive the external binary when the
/// built-in implementation is not used.
#[derive(Debug, Clone)]
pub struct Compressor {
    pub name: String,
    pub extension: String,
    pub binary: String,
    pub compress_args: Vec<String>,
    pub decompress_args: Vec<String>,
    pub cost: u16,
    pub kind: CodecKind,
}

impl Compressor {
    fn builtin(
        name: &str,
        extension: &str,
        binary: &str,
        cost: u16,
        kind: CodecKind,
    ) -> Compressor {
        Compressor {
            name: name.to_string(),
            extension: extension.to_string(),
            binary: binary.to_string(),
            compress_args: vec!["-6".to_string()],
            decompress_args: vec!["-d".to_string()],
            cost,
            kind,
        }
    }
}

static BUILTINS: Lazy<Vec<Compressor>> = Lazy::new(|| {
    vec![
        Compressor {
            name: ".".to_string(),
            extension: String::new(),
            binary: String::new(),
            compress_args: Vec::new(),
            decompress_args: Vec::new(),
            cost: 0,
            kind: CodecKind::Identity,
        },
        Compressor::builtin("zstd", ".zst", "zstd", 60, CodecKind::Zstd),
        Compressor::builtin("lz4", ".lz4", "lz4", 50, CodecKind::Lz4),
        Compressor::builtin("gzip", ".gz", "gzip", 100, CodecKind::Gzip),
        Compressor::builtin("xz", ".xz", "xz", 200, CodecKind::Xz),
        Compressor::builtin("bzip2", ".bz2", "bzip2", 300, CodecKind::Bzip2),
        Compressor::builtin("lzma", ".lzma", "lzma", 400, CodecKind::Lzma),
    ]
});

/// The set of known compressors, built-ins first, extended from the
/// `Compressor::<name>` configuration subtree for external binaries.
#[derive(Debug, Clone)]
pub struct CompressorRegistry {
    entries: Vec<Compressor>,
}

impl CompressorRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTINS.clone(),
        }
    }

    /// Built-ins plus configured external compressors, ordered by cost.
    pub fn from_config(config: &Configuration) -> Self {
        let mut registry = Self::builtin();
        for (name, _) in config.tree("Compressor") {
            if registry.find_by_name(&name).is_some() {
                continue;
            }
            let base = format!("Compressor::{name}");
            let entry = Compressor {
                extension: config.find(&format!("{base}::Extension"), &format!(".{name}")),
                binary: config.find(&format!("{base}::Binary"), &name),
                compress_args: {
                    let args = config.find_vector(&format!("{base}::CompressArg"));
                    if args.is_empty() { vec!["-6".to_string()] } else { args }
                },
                decompress_args: {
                    let args = config.find_vector(&format!("{base}::DecompressArg"));
                    if args.is_empty() { vec!["-d".to_string()] } else { args }
                },
                cost: config.find_int(&format!("{base}::Cost"), 500) as u16,
                name,
                kind: CodecKind::Piped,
            };
            registry.entries.push(entry);
        }
        registry.entries.sort_by_key(|e| e.cost);
        registry
    }

    pub fn iter(&self) -> impl Iterator<Item = &Compressor> {
        self.entries.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Compressor> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn find_by_extension(&self, extension: &str) -> Option<&Compressor> {
        let dotted = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{extension}")
        };
        self.entries
            .iter()
            .find(|e| !e.extension.is_empty() && e.extension == dotted)
    }

    /// Pick a codec for `path` by its trailing extension, after peeling
    /// one `.new` or `.bak` suffix. Unknown extensions read as plain.
    pub fn detect_by_extension(&self, path: &Path) -> (&Compressor, PathBuf) {
        let mut effective = path.to_path_buf();
        if let Some(ext) = effective.extension().and_then(|e| e.to_str()) {
            if ext == "new" || ext == "bak" {
                effective.set_extension("");
            }
        }
        let compressor = effective
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.find_by_extension(e))
            .unwrap_or_else(|| self.identity());
        (compressor, path.to_path_buf())
    }

    /// Pick a codec by probing which `path + extension` exists on disk,
    /// cheapest codec first. Returns the compressor and the real path.
    pub fn detect_auto(&self, path: &Path) -> Option<(&Compressor, PathBuf)> {
        let mut ordered: Vec<&Compressor> = self.entries.iter().collect();
        ordered.sort_by_key(|e| e.cost);
        for compressor in ordered {
            let candidate = appended(path, &compressor.extension);
            if candidate.is_file() {
                return Some((compressor, candidate));
            }
        }
        None
    }

    pub fn identity(&self) -> &Compressor {
        // the identity entry is always present
        self.entries
            .iter()
            .find(|e| e.kind == CodecKind::Identity)
            .unwrap()
    }
}

fn appended(path: &Path, extension: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(extension);
    PathBuf::from(s)
}
