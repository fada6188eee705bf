use std::path::Path;

use depot_io::{
    copy_file, BufFile, CompressMode, CompressorRegistry, IoError, Mode, OpenOptions,
};

fn write_through(
    path: &Path,
    data: &[u8],
    compress: CompressMode,
    registry: &CompressorRegistry,
) {
    let mut out = BufFile::open_with(
        path,
        Mode::WriteOnly,
        OpenOptions::new().create(true).empty(true),
        compress,
        registry,
    )
    .unwrap();
    out.write_all(data).unwrap();
    out.close().unwrap();
}

fn read_back(path: &Path, compress: CompressMode, registry: &CompressorRegistry) -> Vec<u8> {
    let mut input =
        BufFile::open_with(path, Mode::ReadOnly, OpenOptions::new(), compress, registry).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 977];
    loop {
        let n = input.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    input.close().unwrap();
    out
}

#[test]
fn plain_write_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain");
    let registry = CompressorRegistry::builtin();

    write_through(&path, b"hello plain file", CompressMode::None, &registry);
    assert_eq!(
        read_back(&path, CompressMode::None, &registry),
        b"hello plain file"
    );
}

#[test]
fn builtin_codecs_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let payload: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();

    for ext in ["gz", "bz2", "xz", "lz4", "zst"] {
        let path = dir.path().join(format!("data.{ext}"));
        write_through(&path, &payload, CompressMode::Extension, &registry);
        // on-disk bytes must differ from the payload
        assert_ne!(std::fs::read(&path).unwrap(), payload, "{ext}");
        assert_eq!(
            read_back(&path, CompressMode::Extension, &registry),
            payload,
            "{ext}"
        );
    }
}

#[test]
fn empty_compressed_input_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let path = dir.path().join("empty.gz");
    std::fs::write(&path, b"").unwrap();

    let mut input = BufFile::open_with(
        &path,
        Mode::ReadOnly,
        OpenOptions::new(),
        CompressMode::Extension,
        &registry,
    )
    .unwrap();
    assert_eq!(input.size().unwrap(), 0);
    let mut buf = [0u8; 16];
    assert_eq!(input.read(&mut buf).unwrap(), 0);
    assert!(input.eof());
}

#[test]
fn auto_detect_picks_existing_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let compressed = dir.path().join("Packages.gz");
    write_through(&compressed, b"Package: foo\n", CompressMode::Extension, &registry);

    let logical = dir.path().join("Packages");
    assert_eq!(
        read_back(&logical, CompressMode::Auto, &registry),
        b"Package: foo\n"
    );
}

#[test]
fn seek_backwards_restreams_codec() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let path = dir.path().join("data.zst");
    let payload = b"0123456789abcdefghij".repeat(500);
    write_through(&path, &payload, CompressMode::Extension, &registry);

    let mut input = BufFile::open_with(
        &path,
        Mode::ReadOnly,
        OpenOptions::new(),
        CompressMode::Extension,
        &registry,
    )
    .unwrap();

    let mut buf = [0u8; 10];
    input.seek(20).unwrap();
    input.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, &payload[20..30]);

    input.seek(5).unwrap();
    input.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, &payload[5..15]);
    assert_eq!(input.tell(), 15);
}

#[test]
fn writers_refuse_backward_seek() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let path = dir.path().join("out.gz");

    let mut out = BufFile::open_with(
        &path,
        Mode::WriteOnly,
        OpenOptions::new().create(true),
        CompressMode::Extension,
        &registry,
    )
    .unwrap();
    out.write_all(b"12345").unwrap();
    assert!(matches!(out.seek(0), Err(IoError::SeekNotSupported)));
}

#[test]
fn atomic_write_appears_only_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target");

    let mut out = BufFile::open(
        &path,
        Mode::WriteOnly,
        OpenOptions::new().atomic(true).del_on_fail(true),
    )
    .unwrap();
    out.write_all(b"staged").unwrap();
    assert!(!path.exists(), "target must not exist before close");
    out.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"staged");
}

#[test]
fn failed_atomic_write_leaves_no_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target");

    {
        let mut out = BufFile::open(
            &path,
            Mode::WriteOnly,
            OpenOptions::new().atomic(true).del_on_fail(true),
        )
        .unwrap();
        out.write_all(b"junk").unwrap();
        // a failed transfer latches the handle
        out.op_fail();
        assert!(out.failed());
        assert!(out.close().is_err());
    }
    assert!(!path.exists());
    // no stray temp siblings either
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn replace_mode_stages_dot_new() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");
    std::fs::write(&path, b"old").unwrap();

    let mut out = BufFile::open(&path, Mode::WriteOnly, OpenOptions::new().replace(true)).unwrap();
    out.write_all(b"new contents").unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"old");
    out.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
}

#[test]
fn limit_caps_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limited");
    std::fs::write(&path, b"0123456789").unwrap();

    let mut input = BufFile::open(&path, Mode::ReadOnly, OpenOptions::new()).unwrap();
    input.limit(4);
    let mut buf = [0u8; 10];
    assert_eq!(input.read(&mut buf).unwrap(), 4);
    assert_eq!(input.read(&mut buf).unwrap(), 0);
    assert!(input.eof());
}

#[test]
fn read_line_keeps_newline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lines");
    std::fs::write(&path, b"first\nsecond\nlast").unwrap();

    let mut input = BufFile::open(&path, Mode::ReadOnly, OpenOptions::new()).unwrap();
    let mut line = String::new();
    assert!(input.read_line(&mut line).unwrap());
    assert_eq!(line, "first\n");

    line.clear();
    assert!(input.read_line(&mut line).unwrap());
    assert_eq!(line, "second\n");

    line.clear();
    assert!(input.read_line(&mut line).unwrap());
    assert_eq!(line, "last");

    line.clear();
    assert!(!input.read_line(&mut line).unwrap());
}

#[test]
fn fail_flag_sticks_until_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sticky");
    std::fs::write(&path, b"data").unwrap();

    let mut input = BufFile::open(&path, Mode::ReadOnly, OpenOptions::new()).unwrap();
    assert!(input.write_all(b"nope").is_err());
    assert!(input.failed());
    assert!(matches!(input.read(&mut [0u8; 4]), Err(IoError::Failed)));

    input.clear_fail();
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"data");
}

#[test]
fn copy_file_streams_everything() {
    let dir = tempfile::tempdir().unwrap();
    let registry = CompressorRegistry::builtin();
    let src = dir.path().join("src.xz");
    let dst = dir.path().join("dst");
    let payload = b"compressed to plain".repeat(1000);
    write_through(&src, &payload, CompressMode::Extension, &registry);

    let mut from = BufFile::open_with(
        &src,
        Mode::ReadOnly,
        OpenOptions::new(),
        CompressMode::Extension,
        &registry,
    )
    .unwrap();
    let mut to = BufFile::open(&dst, Mode::WriteOnly, OpenOptions::new().create(true)).unwrap();
    let copied = copy_file(&mut from, &mut to).unwrap();
    to.close().unwrap();

    assert_eq!(copied, payload.len() as u64);
    assert_eq!(std::fs::read(&dst).unwrap(), payload);
}

#[test]
fn buffered_write_coalesces_and_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buffered");

    let mut out = BufFile::open(
        &path,
        Mode::WriteOnly,
        OpenOptions::new().create(true).buffered_write(true),
    )
    .unwrap();
    // stays below the coalescing threshold until flush
    for _ in 0..10 {
        out.write_all(b"tiny ").unwrap();
    }
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    out.flush().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 50);

    // large writes drain on their own
    out.write_all(&[b'x'; 8192]).unwrap();
    out.close().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 50 + 8192);
}

#[test]
fn piped_backend_runs_an_external_filter() {
    // `cat` stands in for an external compressor binary: both
    // directions are identity, which makes the plumbing observable
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("piped.cat");

    let compressor = depot_io::Compressor {
        name: "cat".to_string(),
        extension: ".cat".to_string(),
        binary: "cat".to_string(),
        compress_args: vec![],
        decompress_args: vec![],
        cost: 900,
        kind: depot_io::CodecKind::Piped,
    };

    let mut out = BufFile::open_compressor(
        &path,
        Mode::WriteOnly,
        OpenOptions::new().create(true),
        &compressor,
    )
    .unwrap();
    out.write_all(b"through the pipe").unwrap();
    out.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"through the pipe");

    let mut input =
        BufFile::open_compressor(&path, Mode::ReadOnly, OpenOptions::new(), &compressor).unwrap();
    let mut buf = [0u8; 64];
    let n = input.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"through the pipe");
    input.close().unwrap();
}

#[test]
fn piped_backend_empty_input_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.cat");
    std::fs::write(&path, b"").unwrap();

    let compressor = depot_io::Compressor {
        name: "cat".to_string(),
        extension: ".cat".to_string(),
        binary: "cat".to_string(),
        compress_args: vec![],
        decompress_args: vec![],
        cost: 900,
        kind: depot_io::CodecKind::Piped,
    };

    let mut input =
        BufFile::open_compressor(&path, Mode::ReadOnly, OpenOptions::new(), &compressor).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(input.read(&mut buf).unwrap(), 0);
    input.close().unwrap();
}
