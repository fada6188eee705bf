//! Signature verification as an acquire method, so verification runs
//! through the same queue as the downloads it guards.

use depot_acquire::{
    AcquireError, Capabilities, FetchItem, FetchResult, MethodHandler, MethodIo, Result,
};
use depot_signed::{
    split_clearsigned, starts_with_clearsign_marker, verify_detached,
    verify_detached_signature_file, KeyringOptions,
};
use depot_util::{dequote_string, Uri};
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

pub struct SqvMethod;

impl SqvMethod {
    pub fn capabilities() -> Capabilities {
        Capabilities::new("sqv", "1.1")
            .single_instance()
            .send_config()
            .send_uri_encoded()
    }

    fn keyring_options(io: &MethodIo, item: &FetchItem) -> KeyringOptions {
        KeyringOptions {
            signed_by: item.signed_by.as_ref().map(|raw| dequote_string(raw)),
            trusted_parts: io
                .config
                .find_opt("Dir::Etc::TrustedParts")
                .map(PathBuf::from),
            trusted_file: io.config.find_opt("Dir::Etc::Trusted").map(PathBuf::from),
            verifier: io.config.find_opt("Binary::sqv::Executable"),
        }
    }
}

impl MethodHandler for SqvMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        let get = Uri::parse(&item.uri);
        let source = PathBuf::from(format!("{}{}", get.host, dequote_string(&get.path)));
        let options = Self::keyring_options(io, item);

        let clearsigned = source == item.dest_file
            || starts_with_clearsign_marker(&source)
                .map_err(|e| AcquireError::SignatureInvalid(e.to_string()))?;
        let signers = if clearsigned {
            // clearsigned: split, verify, and write the payload out
            let mut payload = tempfile::Builder::new().prefix("depot-msg.").tempfile()?;
            let mut signature = tempfile::Builder::new().prefix("depot-sig.").tempfile()?;
            split_clearsigned(
                &source,
                Some(payload.as_file_mut()),
                Some(signature.as_file_mut()),
            )
            .map_err(|e| AcquireError::SignatureInvalid(e.to_string()))?;
            payload.as_file_mut().seek(SeekFrom::Start(0))?;

            let signers = verify_detached(payload.path(), signature.path(), &options)
                .map_err(|e| AcquireError::SignatureInvalid(e.to_string()))?;

            if item.dest_file.as_os_str() != "/dev/null" && item.dest_file != source {
                payload.as_file_mut().seek(SeekFrom::Start(0))?;
                let mut out = std::fs::File::create(&item.dest_file)?;
                std::io::copy(payload.as_file_mut(), &mut out)?;
            }
            signers
        } else {
            // detached pair: the URI names the signature, the
            // destination carries the signed data
            verify_detached_signature_file(&source)
                .map_err(|e| AcquireError::SignatureInvalid(e.to_string()))?;
            verify_detached(&item.dest_file, &source, &options)
                .map_err(|e| AcquireError::SignatureInvalid(e.to_string()))?
        };

        let result = FetchResult {
            filename: item.dest_file.clone(),
            signed_by: signers,
            ..FetchResult::default()
        };
        io.uri_done(item, &result)
    }
}
