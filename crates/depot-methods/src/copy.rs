//! Local file copy with hashing and mtime transfer.

use chrono::{DateTime, Utc};
use depot_acquire::{
    AcquireError, Capabilities, FetchItem, FetchResult, MethodHandler, MethodIo, Result,
};
use depot_hashes::MultiHasher;
use depot_io::{copy_file, BufFile, Mode, OpenOptions};

pub struct CopyMethod;

impl CopyMethod {
    pub fn capabilities() -> Capabilities {
        Capabilities::new("copy", "1.0")
            .single_instance()
            .send_config()
    }

    fn hash_file(item: &FetchItem, path: &std::path::Path) -> Result<MultiHasher> {
        let mut hasher = if item.expected_hashes.is_empty() {
            MultiHasher::new()
        } else {
            MultiHasher::for_list(&item.expected_hashes)
        };
        hasher.add_file(&mut std::fs::File::open(path)?, None)?;
        Ok(hasher)
    }
}

impl MethodHandler for CopyMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        // the scheme prefix is all that gets stripped so relative
        // paths keep working
        let source = item
            .uri
            .split_once(':')
            .map(|(_, path)| path)
            .unwrap_or(&item.uri)
            .to_string();
        let source = std::path::PathBuf::from(source);

        let meta = std::fs::metadata(&source)
            .map_err(|_| AcquireError::NotFound(item.uri.clone()))?;
        let mtime: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::from);

        io.uri_start(item, Some(meta.len()), mtime, 0)?;

        let mut result = FetchResult {
            filename: item.dest_file.clone(),
            last_modified: mtime,
            ..FetchResult::default()
        };

        // identical source and destination degrade to hashing only
        if source != item.dest_file && item.dest_file.as_os_str() != "/dev/null" {
            let mut from = BufFile::open(&source, Mode::ReadOnly, OpenOptions::new())?;
            let mut to = BufFile::open(
                &item.dest_file,
                Mode::WriteOnly,
                OpenOptions::new().atomic(true).del_on_fail(true),
            )?;
            if let Err(error) = copy_file(&mut from, &mut to) {
                to.op_fail();
                return Err(error.into());
            }
            to.close()?;
            if let Ok(modified) = meta.modified() {
                depot_io::set_file_mtime(&item.dest_file, modified)?;
            }
        }

        let hash_target = if item.dest_file.as_os_str() == "/dev/null" {
            &source
        } else {
            &item.dest_file
        };
        result.take_hashes(Self::hash_file(item, hash_target)?);
        io.uri_done(item, &result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_acquire::{run_method_on, Capabilities};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copies_and_reports_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let dest = dir.path().join("dest");
        std::fs::write(&source, b"copy me").unwrap();

        let input = format!(
            "600 URI Acquire\nURI: copy:{}\nFilename: {}\n\n",
            source.display(),
            dest.display()
        );
        let output = SharedBuf::default();
        run_method_on(
            &Capabilities::new("copy", "1.0").send_uri_encoded(),
            &mut CopyMethod,
            &mut Cursor::new(input.into_bytes()),
            Box::new(output.clone()),
        )
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"copy me");
        let written = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("201 URI Done"));
        assert!(written.contains("Checksum-FileSize-Hash: 7"));
    }

    #[test]
    fn missing_source_fails_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let input = format!(
            "600 URI Acquire\nURI: copy:{}/missing\nFilename: {}/dest\n\n",
            dir.path().display(),
            dir.path().display()
        );
        let output = SharedBuf::default();
        run_method_on(
            &Capabilities::new("copy", "1.0").send_uri_encoded(),
            &mut CopyMethod,
            &mut Cursor::new(input.into_bytes()),
            Box::new(output.clone()),
        )
        .unwrap();

        let written = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("400 URI Failure"));
        assert!(written.contains("FailReason: NotFound"));
    }
}
