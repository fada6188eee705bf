//! Remote-shell tunnel: stat with `find -printf`, stream with
//! `dd skip=` so interrupted transfers resume on 2 KiB block edges.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};

use chrono::{DateTime, TimeZone, Utc};
use depot_acquire::{
    AcquireError, Capabilities, FetchItem, FetchResult, MethodHandler, MethodIo, Result,
};
use depot_hashes::MultiHasher;
use depot_io::{BufFile, Mode, OpenOptions};
use depot_util::{Configuration, Uri};

const BLOCK_SIZE: u64 = 2048;

pub struct RshMethod {
    binary: String,
}

impl RshMethod {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities::new("rsh", "1.0").send_config().send_uri_encoded()
    }

    fn remote_command(&self, config: &Configuration, site: &Uri, remote: &str) -> Command {
        let program = config.find(&format!("Acquire::{}::Program", self.binary), &self.binary);
        let mut command = Command::new(program);
        for option in config.find_vector(&format!("Acquire::{}::Options", self.binary)) {
            command.arg(option);
        }
        if !site.user.is_empty() {
            command.arg("-l").arg(&site.user);
        }
        command.arg(&site.host);
        command.arg(remote);
        command.stdin(Stdio::null()).stderr(Stdio::null());
        command
    }

    /// `size mtime` of the remote path, via find's printf.
    fn stat_remote(
        &self,
        config: &Configuration,
        site: &Uri,
        path: &str,
    ) -> Result<(u64, Option<DateTime<Utc>>)> {
        let probe = format!("find {path} -follow -printf '%s %T@\\n'");
        let output = self
            .remote_command(config, site, &probe)
            .stdout(Stdio::piped())
            .output()
            .map_err(|e| AcquireError::Other(format!("cannot run {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(AcquireError::NotFound(path.to_string()));
        }
        let mut line = String::new();
        BufReader::new(&output.stdout[..]).read_line(&mut line)?;
        let mut fields = line.split_whitespace();
        let size: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AcquireError::Protocol(format!("unparseable stat reply: {line}")))?;
        let mtime = fields
            .next()
            .and_then(|s| s.split('.').next())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        Ok((size, mtime))
    }
}

impl MethodHandler for RshMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        let site = Uri::parse(&item.uri);
        let path = depot_util::dequote_string(&site.path);

        let (size, mtime) = self.stat_remote(&io.config, &site, &path)?;

        if let (Some(remote), Some(local)) = (mtime, item.last_modified) {
            if remote <= local {
                let result = FetchResult {
                    filename: item.dest_file.clone(),
                    ims_hit: true,
                    last_modified: Some(remote),
                    ..FetchResult::default()
                };
                return io.uri_done(item, &result);
            }
        }

        // resume on a whole block edge; the tail of the last block is
        // transferred again
        let on_disk = std::fs::metadata(&item.dest_file)
            .map(|m| m.len())
            .unwrap_or(0);
        let resume_from = (on_disk / BLOCK_SIZE) * BLOCK_SIZE;

        io.uri_start(item, Some(size), mtime, resume_from)?;

        let fetch = format!(
            "dd if={path} bs={BLOCK_SIZE} skip={} 2>/dev/null",
            resume_from / BLOCK_SIZE
        );
        let mut child = self
            .remote_command(&io.config, &site, &fetch)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AcquireError::Other(format!("cannot run {}: {e}", self.binary)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AcquireError::Other("remote shell has no stdout".into()))?;

        let mut hasher = if item.expected_hashes.is_empty() {
            MultiHasher::new()
        } else {
            MultiHasher::for_list(&item.expected_hashes)
        };
        if resume_from > 0 {
            let mut partial = std::fs::File::open(&item.dest_file)?;
            hasher.add_file(&mut partial, Some(resume_from))?;
        }

        let mut file = BufFile::open(
            &item.dest_file,
            Mode::ReadWrite,
            OpenOptions::new().create(true),
        )?;
        file.truncate(resume_from)?;
        file.seek(resume_from)?;

        let mut written = resume_from;
        let mut buf = [0u8; 16 * 1024];
        loop {
            let got = stdout.read(&mut buf)?;
            if got == 0 {
                break;
            }
            written += got as u64;
            if let Some(max) = item.maximum_size {
                if written > max {
                    let _ = child.kill();
                    return Err(AcquireError::MaximumSizeExceeded(max));
                }
            }
            hasher.add(&buf[..got]);
            file.write_all(&buf[..got])?;
        }
        file.close()?;

        let status = child.wait()?;
        if !status.success() {
            return Err(AcquireError::Protocol(format!(
                "remote shell exited with {status}"
            )));
        }

        if let Some(when) = mtime {
            let _ = depot_io::set_file_mtime(&item.dest_file, when.into());
        }

        let mut result = FetchResult {
            filename: item.dest_file.clone(),
            last_modified: mtime,
            resume_point: resume_from,
            ..FetchResult::default()
        };
        result.take_hashes(hasher);
        io.uri_done(item, &result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_acquire::run_method_on;
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

    /// A stand-in remote shell: `sh -c` executes the remote command
    /// locally, which exercises the full stat + dd exchange.
    #[test]
    fn fetches_through_a_fake_shell() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("remote-file");
        let dest = dir.path().join("local-file");
        std::fs::write(&source, b"over the wire".repeat(400)).unwrap();

        let shell = dir.path().join("fake-rsh");
        // drop the host argument, run the command
        std::fs::write(&shell, "#!/bin/sh\nshift\nexec sh -c \"$@\"\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&shell, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = format!(
            "601 Configuration\n\
             Config-Item: Acquire::rsh::Program={}\n\
             \n\
             600 URI Acquire\n\
             URI: rsh://testhost{}\n\
             Filename: {}\n\n",
            shell.display(),
            source.display(),
            dest.display()
        );
        let output = SharedBuf::default();
        run_method_on(
            &Capabilities::new("rsh", "1.0").send_config().send_uri_encoded(),
            &mut RshMethod::new("rsh"),
            &mut Cursor::new(input.into_bytes()),
            Box::new(output.clone()),
        )
        .unwrap();

        let written = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("201 URI Done"), "{written}");
        assert_eq!(
            std::fs::read(&dest).unwrap(),
            std::fs::read(&source).unwrap()
        );
    }
}
