use std::path::{Path, PathBuf};

use depot_signed::{
    split_clearsigned, starts_with_clearsign_marker, verify_detached, KeyringOptions,
    SignedError,
};

const SIGNATURE_BLOCK: &str = "-----BEGIN PGP SIGNATURE-----\n\
\n\
iQFEBAEBCgAuFiEENKjp0Y2zIPNn6OqgWpDRQdusja4FAlhT7+kQHGpvZUBleGFt\n\
cGxlLm9yZwAKCRBakNFB26yNrjvEB/9/e3jA1l0fvPafx9LEXcH8CLpUFQK7ra9l\n\
=TB1F\n\
-----END PGP SIGNATURE-----\n";

fn write_temp(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("input");
    std::fs::write(&path, content).unwrap();
    path
}

fn split(content: &str) -> Result<(bool, String, String), SignedError> {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(dir.path(), content);
    let mut payload = Vec::new();
    let mut signature = Vec::new();
    let signed = split_clearsigned(&path, Some(&mut payload), Some(&mut signature))?;
    Ok((
        signed,
        String::from_utf8(payload).unwrap(),
        String::from_utf8(signature).unwrap(),
    ))
}

#[test]
fn splits_simple_signed_file() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n{SIGNATURE_BLOCK}"
    );
    let (signed, payload, signature) = split(&content).unwrap();
    assert!(signed);
    assert_eq!(payload, "Test\n");
    assert_eq!(signature, SIGNATURE_BLOCK);
}

#[test]
fn tolerates_trailing_whitespace() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE----- \t  \nHash:   SHA512   \n\t   \nTest\t\n{SIGNATURE_BLOCK}"
    );
    let (signed, payload, _) = split(&content).unwrap();
    assert!(signed);
    assert_eq!(payload, "Test\n");
}

#[test]
fn consumes_content_headers() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\n\
         Version: 0.8.15~exp1\n\
         Hash: SHA512\n\
         Comment: free-form armor headers\n\
         \n\
         Test\n{SIGNATURE_BLOCK}"
    );
    let (_, payload, _) = split(&content).unwrap();
    assert_eq!(payload, "Test\n");
}

#[test]
fn accepts_concatenated_signatures() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n{SIGNATURE_BLOCK}{SIGNATURE_BLOCK}"
    );
    let (signed, payload, signature) = split(&content).unwrap();
    assert!(signed);
    assert_eq!(payload, "Test\n");
    assert_eq!(signature, format!("{SIGNATURE_BLOCK}{SIGNATURE_BLOCK}"));
}

#[test]
fn undoes_dash_escapes() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\n- Test\n{SIGNATURE_BLOCK}"
    );
    let (_, payload, _) = split(&content).unwrap();
    assert_eq!(payload, "Test\n");
}

#[test]
fn unsigned_files_copy_verbatim() {
    let (signed, payload, signature) = split("Test\n").unwrap();
    assert!(!signed);
    assert_eq!(payload, "Test\n");
    assert!(signature.is_empty());
}

#[test]
fn rejects_message_marker_after_content() {
    let content = format!(
        "Garbage\n-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n{SIGNATURE_BLOCK}"
    );
    assert!(matches!(
        split(&content),
        Err(SignedError::MessageNotAtStart(_))
    ));
}

#[test]
fn rejects_trailing_garbage() {
    let content = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n{SIGNATURE_BLOCK}Garbage\n"
    );
    assert!(matches!(
        split(&content),
        Err(SignedError::UnsignedTrailingLines(_))
    ));
}

#[test]
fn rejects_second_clearsign_message() {
    let one = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n{SIGNATURE_BLOCK}"
    );
    let content = format!("{one}{one}");
    assert!(matches!(
        split(&content),
        Err(SignedError::UnsignedTrailingLines(_))
    ));
}

#[test]
fn rejects_missing_signature() {
    let content = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest";
    assert!(matches!(split(content), Err(SignedError::MissingParts(_))));
}

#[test]
fn rejects_unclosed_signature() {
    let content =
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n-----BEGIN PGP SIGNATURE-----";
    assert!(matches!(
        split(content),
        Err(SignedError::SignatureNotClosed(_))
    ));
}

#[test]
fn rejects_stray_dashes_everywhere() {
    let armor = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n-Hash: x\n\nTest\n";
    assert!(matches!(
        split(&format!("{armor}{SIGNATURE_BLOCK}")),
        Err(SignedError::UnexpectedDashInArmor(_))
    ));

    let msg = format!(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\n-Test\n{SIGNATURE_BLOCK}"
    );
    assert!(matches!(
        split(&msg),
        Err(SignedError::UnexpectedDashInMsg(_))
    ));

    let sig = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n\
               -----BEGIN PGP SIGNATURE-----\n\nabc\n-/def\n=TB1F\n-----END PGP SIGNATURE-----\n";
    assert!(matches!(
        split(sig),
        Err(SignedError::UnexpectedDashInSig(_))
    ));
}

#[test]
fn marker_detection() {
    let dir = tempfile::tempdir().unwrap();
    let signed = write_temp(
        dir.path(),
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA512\n\nTest\n",
    );
    assert!(starts_with_clearsign_marker(&signed).unwrap());

    let garbled = dir.path().join("garbled");
    std::fs::write(&garbled, "-----BEGIN PGP SIGNED MESSAGE----- Garbage\n").unwrap();
    assert!(!starts_with_clearsign_marker(&garbled).unwrap());
}

/// End-to-end check against a stand-in verifier that prints one signer.
#[test]
fn detached_verification_with_stub_verifier() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let fingerprint = "34A8E9D18DB320F367E8EAA05A90D141DBAC8DAE";

    let verifier = dir.path().join("fake-sqv");
    std::fs::write(
        &verifier,
        format!("#!/bin/sh\necho {fingerprint}\nexit 0\n"),
    )
    .unwrap();
    std::fs::set_permissions(&verifier, std::fs::Permissions::from_mode(0o755)).unwrap();

    let keyring_dir = dir.path().join("trusted.d");
    std::fs::create_dir(&keyring_dir).unwrap();
    // binary keyring with a plausible OpenPGP leading byte
    std::fs::write(keyring_dir.join("archive.gpg"), [0x99u8, 0x01, 0x02]).unwrap();

    let message = dir.path().join("message");
    let signature = dir.path().join("signature");
    std::fs::write(&message, "Test\n").unwrap();
    std::fs::write(&signature, SIGNATURE_BLOCK).unwrap();

    let options = KeyringOptions {
        trusted_parts: Some(keyring_dir.clone()),
        verifier: Some(verifier.to_str().unwrap().to_string()),
        ..KeyringOptions::default()
    };
    let signers = verify_detached(&message, &signature, &options).unwrap();
    assert_eq!(signers, vec![fingerprint.to_string()]);

    // required-signer intersection
    let mut restricted = options.clone();
    restricted.signed_by = Some(format!("{fingerprint},AAAA000011112222"));
    assert!(verify_detached(&message, &signature, &restricted).is_ok());

    restricted.signed_by = Some("AAAA000011112222".to_string());
    assert!(matches!(
        verify_detached(&message, &signature, &restricted),
        Err(SignedError::RequiredSignerMissing(_))
    ));
}

#[test]
fn missing_keyring_is_a_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let message = dir.path().join("message");
    let signature = dir.path().join("signature");
    std::fs::write(&message, "Test\n").unwrap();
    std::fs::write(&signature, SIGNATURE_BLOCK).unwrap();

    let options = KeyringOptions {
        trusted_parts: Some(dir.path().join("no-such-dir")),
        ..KeyringOptions::default()
    };
    assert!(matches!(
        verify_detached(&message, &signature, &options),
        Err(SignedError::NoKeyring)
    ));
}
