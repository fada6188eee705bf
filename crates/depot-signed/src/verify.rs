use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use depot_util::list_dir_filtered;
use tempfile::NamedTempFile;

use crate::error::{Result, SignedError};
use crate::split::split_clearsigned;

const BEGIN_PUBLIC_KEY: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// Where trusted keys come from.
#[derive(Debug, Clone, Default)]
pub struct KeyringOptions {
    /// `Signed-By` override: a comma-separated mix of absolute keyring
    /// paths and fingerprints, or an inline armored key block.
    pub signed_by: Option<String>,
    /// The drop-in directory of `.gpg`/`.asc` keyrings.
    pub trusted_parts: Option<PathBuf>,
    /// The deprecated single keyring file.
    pub trusted_file: Option<PathBuf>,
    /// Verifier executable, `sqv` by default.
    pub verifier: Option<String>,
}

/// The outcome of a successful verification: the accepted signer
/// fingerprints, one per line of verifier output.
pub type Signers = Vec<String>;

enum SignedBy {
    Inline(String),
    Mixed {
        files: Vec<PathBuf>,
        fingerprints: Vec<String>,
    },
    None,
}

fn classify_signed_by(value: Option<&str>) -> SignedBy {
    let Some(value) = value else {
        return SignedBy::None;
    };
    if value.contains(BEGIN_PUBLIC_KEY) {
        return SignedBy::Inline(value.to_string());
    }
    let mut files = Vec::new();
    let mut fingerprints = Vec::new();
    for key in value.split(',') {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if key.starts_with('/') {
            files.push(PathBuf::from(key));
        } else {
            fingerprints.push(key.to_string());
        }
    }
    if files.is_empty() && fingerprints.is_empty() {
        SignedBy::None
    } else {
        SignedBy::Mixed {
            files,
            fingerprints,
        }
    }
}

/// A keyring file is usable when it is non-empty and looks like either
/// an armored public key block (`.asc`) or a binary OpenPGP public key
/// packet (leading byte 0x98, 0x99 or 0xc6).
fn keyring_is_usable(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        tracing::warn!(?path, "keyring is not readable, ignoring");
        return false;
    };
    if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        return false;
    }
    if path.extension().and_then(|e| e.to_str()) == Some("asc") {
        let reader = BufReader::new(file);
        let mut state = 0;
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim();
            if line.starts_with(BEGIN_PUBLIC_KEY) {
                state = 1;
            } else if state == 1 && line.is_empty() {
                state = 2;
            } else if line.starts_with("-----END") {
                state = 3;
            }
        }
        if state != 3 {
            tracing::warn!(?path, "keyring has an unsupported filetype, ignoring");
            return false;
        }
        true
    } else {
        let mut lead = [0u8; 1];
        if file.read_exact(&mut lead).is_err()
            || !matches!(lead[0], 0x98 | 0x99 | 0xc6)
        {
            tracing::warn!(?path, "keyring has an unsupported filetype, ignoring");
            return false;
        }
        true
    }
}

fn discover_keyrings(options: &KeyringOptions) -> Result<Vec<PathBuf>> {
    let mut keyrings = Vec::new();
    if let Some(parts) = &options.trusted_parts {
        // a missing drop-in dir is tolerable as long as something else
        // supplies keys
        if let Ok(files) = list_dir_filtered(parts, &["gpg", "asc"]) {
            keyrings.extend(files);
        }
    }
    if let Some(trusted) = &options.trusted_file {
        if trusted.exists() {
            tracing::warn!(?trusted, "loading keyring from deprecated single-file option");
            keyrings.push(trusted.clone());
        }
    }
    keyrings.retain(|path| keyring_is_usable(path));
    Ok(keyrings)
}

fn run_verifier(
    binary: &str,
    keyrings: &[PathBuf],
    signature: &Path,
    message: &Path,
) -> Result<Signers> {
    let mut command = Command::new(binary);
    for keyring in keyrings {
        command.arg("--keyring").arg(keyring);
    }
    command.arg(signature).arg(message);
    command.stdin(Stdio::null());

    // the Sequoia policy override travels via the environment
    if let Ok(policy) = std::env::var("SEQUOIA_CRYPTO_POLICY") {
        command.env("SEQUOIA_CRYPTO_POLICY", policy);
    }

    let output = command
        .output()
        .map_err(|e| SignedError::Io(std::io::Error::other(format!("cannot run {binary}: {e}"))))?;

    if !output.status.success() {
        return Err(SignedError::VerifierFailed {
            binary: binary.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let signers: Signers = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    Ok(signers)
}

/// Verify `message` against `signature` with every discovered keyring.
/// Returns the accepted signer fingerprints; an empty accepted set is
/// always an error, never a silent success.
pub fn verify_detached(
    message: &Path,
    signature: &Path,
    options: &KeyringOptions,
) -> Result<Signers> {
    let mut inline_key: Option<NamedTempFile> = None;
    let (mut keyrings, fingerprints) = match classify_signed_by(options.signed_by.as_deref()) {
        SignedBy::Inline(armor) => {
            let mut temp = tempfile::Builder::new()
                .prefix("depot-key.")
                .suffix(".asc")
                .tempfile()?;
            temp.write_all(armor.as_bytes())?;
            temp.flush()?;
            let path = temp.path().to_path_buf();
            inline_key = Some(temp);
            (vec![path], Vec::new())
        }
        SignedBy::Mixed {
            files,
            fingerprints,
        } => (files, fingerprints),
        SignedBy::None => (Vec::new(), Vec::new()),
    };

    if keyrings.is_empty() {
        keyrings = discover_keyrings(options)?;
    }
    if keyrings.is_empty() {
        return Err(SignedError::NoKeyring);
    }

    let binary = options.verifier.as_deref().unwrap_or("sqv");
    let mut signers = run_verifier(binary, &keyrings, signature, message)?;
    drop(inline_key);

    if signers.is_empty() {
        return Err(SignedError::NoGoodSignature);
    }

    if !fingerprints.is_empty() {
        signers.retain(|signer| fingerprints.iter().any(|f| f.eq_ignore_ascii_case(signer)));
        if signers.is_empty() {
            return Err(SignedError::RequiredSignerMissing(fingerprints.join(", ")));
        }
    }

    Ok(signers)
}

/// Verify a clearsigned file in place: split it, then verify the
/// embedded signature over the embedded payload. The split payload is
/// written to `payload_out` when given (fetchers hand the destination
/// file here).
pub fn verify_clearsigned(
    path: &Path,
    payload_out: Option<&Path>,
    options: &KeyringOptions,
) -> Result<Signers> {
    let mut payload = tempfile::Builder::new()
        .prefix("depot-msg.")
        .tempfile()?;
    let mut signature = tempfile::Builder::new()
        .prefix("depot-sig.")
        .tempfile()?;

    split_clearsigned(
        path,
        Some(payload.as_file_mut()),
        Some(signature.as_file_mut()),
    )?;
    payload.as_file_mut().seek(SeekFrom::Start(0))?;

    let signers = verify_detached(payload.path(), signature.path(), options)?;

    if let Some(dest) = payload_out {
        let mut out = File::create(dest)?;
        std::io::copy(payload.as_file_mut(), &mut out)?;
    }
    Ok(signers)
}
