use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use depot_tagfile::{Scanned, TagSection};

use crate::error::{ArchiveError, Result};

const AR_MAGIC: &[u8] = b"!<arch>\n";

/// One member of an `ar` archive.
struct ArMember {
    name: String,
    data: Vec<u8>,
}

fn parse_ar(path: &Path, raw: &[u8]) -> Result<Vec<ArMember>> {
    if !raw.starts_with(AR_MAGIC) {
        return Err(ArchiveError::NotAnArchive {
            path: path.to_path_buf(),
        });
    }
    let mut members = Vec::new();
    let mut offset = AR_MAGIC.len();
    while offset + 60 <= raw.len() {
        let header = &raw[offset..offset + 60];
        if &header[58..60] != b"`\n" {
            return Err(ArchiveError::NotAnArchive {
                path: path.to_path_buf(),
            });
        }
        let name = String::from_utf8_lossy(&header[..16])
            .trim_end()
            .trim_end_matches('/')
            .to_string();
        let size: usize = String::from_utf8_lossy(&header[48..58])
            .trim()
            .parse()
            .map_err(|_| ArchiveError::NotAnArchive {
                path: path.to_path_buf(),
            })?;
        offset += 60;
        if offset + size > raw.len() {
            return Err(ArchiveError::NotAnArchive {
                path: path.to_path_buf(),
            });
        }
        members.push(ArMember {
            name,
            data: raw[offset..offset + size].to_vec(),
        });
        offset += size;
        if offset % 2 == 1 {
            offset += 1;
        }
    }
    Ok(members)
}

fn decode_member(name: &str, data: Vec<u8>) -> Result<Box<dyn Read>> {
    let cursor = Cursor::new(data);
    Ok(if name.ends_with(".gz") {
        Box::new(flate2::read::MultiGzDecoder::new(cursor))
    } else if name.ends_with(".xz") {
        Box::new(xz2::read::XzDecoder::new_multi_decoder(cursor))
    } else if name.ends_with(".zst") {
        Box::new(
            zstd::stream::read::Decoder::new(cursor)
                .map_err(|e| depot_io::IoError::Codec(e.to_string()))?,
        )
    } else {
        Box::new(cursor)
    })
}

/// The data a writer needs out of one binary package file.
pub struct DebFile {
    /// raw `control` paragraph bytes
    pub control: Vec<u8>,
    /// shipped paths, leading `./` stripped, directories omitted
    pub contents: Vec<String>,
}

impl DebFile {
    /// Crack open the `!<arch>` container and pull the control
    /// paragraph and the shipped-file list out of its tar members.
    pub fn read(path: &Path) -> Result<DebFile> {
        let raw = std::fs::read(path)?;
        let members = parse_ar(path, &raw)?;

        let mut control = None;
        let mut contents = Vec::new();
        for member in members {
            if member.name.starts_with("control.tar") {
                control = Some(Self::extract_control(&member.name, member.data, path)?);
            } else if member.name.starts_with("data.tar") {
                contents = Self::list_data(&member.name, member.data)?;
            }
        }

        let control = control.ok_or_else(|| ArchiveError::NoControlMember {
            path: path.to_path_buf(),
        })?;
        Ok(DebFile { control, contents })
    }

    fn extract_control(name: &str, data: Vec<u8>, path: &Path) -> Result<Vec<u8>> {
        let decoder = decode_member(name, data)?;
        let mut archive = tar::Archive::new(decoder);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();
            let normalized = entry_path
                .strip_prefix("./")
                .unwrap_or(&entry_path)
                .to_path_buf();
            if normalized == PathBuf::from("control") {
                let mut control = Vec::new();
                entry.read_to_end(&mut control)?;
                return Ok(control);
            }
        }
        Err(ArchiveError::NoControlMember {
            path: path.to_path_buf(),
        })
    }

    fn list_data(name: &str, data: Vec<u8>) -> Result<Vec<String>> {
        let decoder = decode_member(name, data)?;
        let mut archive = tar::Archive::new(decoder);
        let mut paths = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let entry_path = entry.path()?.into_owned();
            let text = entry_path.to_string_lossy();
            let text = text.strip_prefix("./").unwrap_or(&text);
            if !text.is_empty() {
                paths.push(text.to_string());
            }
        }
        Ok(paths)
    }

    /// The control paragraph parsed for field access.
    pub fn section(&self) -> Result<TagSection> {
        match TagSection::scan(&self.control, true)? {
            Scanned::Section(section, _) => Ok(section),
            Scanned::Incomplete => Err(ArchiveError::NoControlMember {
                path: PathBuf::from("control"),
            }),
        }
    }
}

/// Build an ar+tar package file for tests.
#[cfg(test)]
pub(crate) fn build_deb(control: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn ar_member(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("{name:<16}").as_bytes());
        out.extend_from_slice(format!("{:<12}", 0).as_bytes());
        out.extend_from_slice(format!("{:<6}", 0).as_bytes());
        out.extend_from_slice(format!("{:<6}", 0).as_bytes());
        out.extend_from_slice(format!("{:<8}", 100644).as_bytes());
        out.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
        out.extend_from_slice(b"`\n");
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
        out
    }

    let control_tar = gz(&tar_of(&[("control", control.as_bytes())]));
    let data_tar = gz(&tar_of(files));

    let mut deb = Vec::new();
    deb.extend_from_slice(AR_MAGIC);
    deb.extend_from_slice(&ar_member("debian-binary", b"2.0\n"));
    deb.extend_from_slice(&ar_member("control.tar.gz", &control_tar));
    deb.extend_from_slice(&ar_member("data.tar.gz", &data_tar));
    deb
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROL: &str = "Package: demo\nVersion: 1.0\nArchitecture: amd64\n\
                           Maintainer: Demo <demo@example.org>\nDescription: a demo\n";

    #[test]
    fn reads_control_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo_1.0_amd64.deb");
        std::fs::write(
            &path,
            build_deb(
                CONTROL,
                &[
                    ("usr/bin/demo", b"#!/bin/sh\n".as_slice()),
                    ("usr/share/doc/demo/copyright", b"(c)".as_slice()),
                ],
            ),
        )
        .unwrap();

        let deb = DebFile::read(&path).unwrap();
        let section = deb.section().unwrap();
        assert_eq!(section.find("Package"), Some("demo"));
        assert_eq!(section.find("Version"), Some("1.0"));
        assert_eq!(
            deb.contents,
            vec!["usr/bin/demo", "usr/share/doc/demo/copyright"]
        );
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.deb");
        std::fs::write(&path, b"not an archive at all").unwrap();
        assert!(matches!(
            DebFile::read(&path),
            Err(ArchiveError::NotAnArchive { .. })
        ));
    }
}
