use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, SignedError};

const BEGIN_MESSAGE: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const BEGIN_SIGNATURE: &str = "-----BEGIN PGP SIGNATURE-----";
const END_SIGNATURE: &str = "-----END PGP SIGNATURE-----";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Unsigned,
    ArmorHeader,
    Payload,
    Signature,
    AfterSignature,
}

/// True when the file's first line is the clearsign opening marker
/// (trailing whitespace tolerated).
pub fn starts_with_clearsign_marker(path: &Path) -> Result<bool> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    Ok(first.trim_end() == BEGIN_MESSAGE)
}

/// Split a possibly clearsigned file into its payload and detached
/// signature blocks, undoing dash escapes on the way. An unsigned file
/// is copied verbatim to `payload`. Returns whether the input was
/// signed.
///
/// One pass over the lines; trailing whitespace per line is dropped,
/// matching what armor tooling tolerates on marker and data lines.
pub fn split_clearsigned(
    path: &Path,
    mut payload: Option<&mut dyn Write>,
    mut signature: Option<&mut dyn Write>,
) -> Result<bool> {
    let reader = BufReader::new(File::open(path)?);
    let mut phase = Phase::Start;

    for raw in reader.split(b'\n') {
        let raw = raw?;
        let line = {
            let text = String::from_utf8_lossy(&raw).into_owned();
            text.trim_end_matches([' ', '\t', '\r']).to_string()
        };

        match phase {
            Phase::Start => {
                if line == BEGIN_MESSAGE {
                    phase = Phase::ArmorHeader;
                } else {
                    phase = Phase::Unsigned;
                    if let Some(out) = payload.as_deref_mut() {
                        out.write_all(&raw)?;
                        out.write_all(b"\n")?;
                    }
                }
            }
            Phase::Unsigned => {
                if line == BEGIN_MESSAGE {
                    return Err(SignedError::MessageNotAtStart(path.to_path_buf()));
                }
                if let Some(out) = payload.as_deref_mut() {
                    out.write_all(&raw)?;
                    out.write_all(b"\n")?;
                }
            }
            Phase::ArmorHeader => {
                if line.is_empty() {
                    phase = Phase::Payload;
                } else if line.starts_with('-') {
                    return Err(SignedError::UnexpectedDashInArmor(path.to_path_buf()));
                }
                // header names are free-form; they carry no payload
            }
            Phase::Payload => {
                if line == BEGIN_SIGNATURE {
                    phase = Phase::Signature;
                    if let Some(out) = signature.as_deref_mut() {
                        writeln!(out, "{line}")?;
                    }
                } else if let Some(escaped) = line.strip_prefix("- ") {
                    if let Some(out) = payload.as_deref_mut() {
                        writeln!(out, "{escaped}")?;
                    }
                } else if line.starts_with('-') {
                    return Err(SignedError::UnexpectedDashInMsg(path.to_path_buf()));
                } else if let Some(out) = payload.as_deref_mut() {
                    writeln!(out, "{line}")?;
                }
            }
            Phase::Signature => {
                if line == END_SIGNATURE {
                    phase = Phase::AfterSignature;
                } else if line.starts_with('-') && line != BEGIN_SIGNATURE {
                    return Err(SignedError::UnexpectedDashInSig(path.to_path_buf()));
                }
                if let Some(out) = signature.as_deref_mut() {
                    writeln!(out, "{line}")?;
                }
            }
            Phase::AfterSignature => {
                if line == BEGIN_SIGNATURE {
                    phase = Phase::Signature;
                    if let Some(out) = signature.as_deref_mut() {
                        writeln!(out, "{line}")?;
                    }
                } else if !line.is_empty() {
                    return Err(SignedError::UnsignedTrailingLines(path.to_path_buf()));
                }
            }
        }
    }

    match phase {
        Phase::Start | Phase::Unsigned => Ok(false),
        Phase::ArmorHeader | Phase::Payload => {
            Err(SignedError::MissingParts(path.to_path_buf()))
        }
        Phase::Signature => Err(SignedError::SignatureNotClosed(path.to_path_buf())),
        Phase::AfterSignature => Ok(true),
    }
}

/// Open a file that may be clearsigned, yielding a readable handle on
/// the payload alone. Unsigned files are opened as-is; signed ones are
/// split into an anonymous temp file first.
pub fn open_maybe_clearsigned(path: &Path) -> Result<File> {
    if !starts_with_clearsign_marker(path)? {
        // unsigned, but a buried opening marker is still a refusal
        let mut probe = BufReader::new(File::open(path)?);
        let mut line = String::new();
        loop {
            line.clear();
            if probe.read_line(&mut line)? == 0 {
                break;
            }
            if line.trim_end() == BEGIN_MESSAGE {
                return Err(SignedError::MessageNotAtStart(path.to_path_buf()));
            }
        }
        return Ok(File::open(path)?);
    }

    let mut temp = tempfile::tempfile()?;
    split_clearsigned(path, Some(&mut temp), None)?;
    temp.seek(SeekFrom::Start(0))?;
    Ok(temp)
}

/// Sanity-check a file that claims to be a detached signature: it must
/// consist of armored signature blocks only.
pub fn verify_detached_signature_file(path: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    let mut inside = false;
    let mut seen = false;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if !inside {
            if line.is_empty() {
                continue;
            }
            if line == BEGIN_SIGNATURE {
                inside = true;
                seen = true;
            } else {
                return Err(SignedError::UnsignedTrailingLines(path.to_path_buf()));
            }
        } else if line == END_SIGNATURE {
            inside = false;
        } else if line.starts_with('-') {
            return Err(SignedError::UnexpectedDashInSig(path.to_path_buf()));
        }
    }
    if inside {
        return Err(SignedError::SignatureNotClosed(path.to_path_buf()));
    }
    if !seen {
        return Err(SignedError::MissingParts(path.to_path_buf()));
    }
    Ok(())
}

/// Read the whole payload of a maybe-clearsigned file into memory.
pub fn read_payload(path: &Path) -> Result<Vec<u8>> {
    let mut file = open_maybe_clearsigned(path)?;
    let mut out = Vec::new();
    file.read_to_end(&mut out)?;
    Ok(out)
}
