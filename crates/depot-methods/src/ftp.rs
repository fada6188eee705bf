//! RFC 959 client. Passive transfers are preferred (EPSV, then PASV);
//! an active PORT listener is the last resort.

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_acquire::{
    connect_to, AcquireError, Capabilities, FetchItem, FetchResult, MethodFd, MethodHandler,
    MethodIo, Result, TcpFd, CONNECTION_ATTEMPT_DELAY,
};
use depot_hashes::MultiHasher;
use depot_io::{BufFile, Mode, OpenOptions};
use depot_util::{parse_ftp_mdtm, subst_vars, Configuration, Uri};

use crate::http::wire::WireReader;

const DEFAULT_PORT: u16 = 21;

struct FtpConn {
    fd: Box<dyn MethodFd>,
    reader: WireReader,
    timeout: Duration,
    host: String,
    user: String,
}

impl FtpConn {
    /// One (possibly multiline) server reply: `NNN text`, with
    /// continuation lines between `NNN-` and the closing `NNN `.
    fn read_reply(&mut self) -> Result<(u16, String)> {
        let first = self.reader.read_line(self.fd.as_mut())?;
        if first.len() < 4 {
            return Err(AcquireError::Protocol(format!("short FTP reply: {first}")));
        }
        let code: u16 = first[..3]
            .parse()
            .map_err(|_| AcquireError::Protocol(format!("bad FTP reply: {first}")))?;
        let mut text = first[4..].to_string();
        if first.as_bytes()[3] == b'-' {
            loop {
                let line = self.reader.read_line(self.fd.as_mut())?;
                text.push('\n');
                text.push_str(&line);
                if line.len() >= 4
                    && line[..3] == first[..3]
                    && line.as_bytes()[3] == b' '
                {
                    break;
                }
            }
        }
        Ok((code, text))
    }

    fn send(&mut self, command: &str) -> Result<(u16, String)> {
        tracing::debug!(host = %self.host, command, "ftp command");
        self.fd.write_all(format!("{command}\r\n").as_bytes())?;
        self.read_reply()
    }

    fn expect(&mut self, command: &str, accept: &[u16]) -> Result<(u16, String)> {
        let (code, text) = self.send(command)?;
        if !accept.contains(&code) {
            return Err(AcquireError::Protocol(format!(
                "{command} answered {code} {text}"
            )));
        }
        Ok((code, text))
    }
}

pub struct FtpMethod {
    conn: Option<FtpConn>,
}

impl Default for FtpMethod {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpMethod {
    pub fn new() -> Self {
        Self { conn: None }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities::new("ftp", "1.0").send_config().send_uri_encoded()
    }

    fn timeout(config: &Configuration) -> Duration {
        Duration::from_secs(config.find_int("Acquire::ftp::Timeout", 120).max(1) as u64)
    }

    fn login(
        conn: &mut FtpConn,
        config: &Configuration,
        site: &Uri,
        proxied: bool,
    ) -> Result<()> {
        let (code, text) = conn.read_reply()?;
        if code != 220 {
            return Err(AcquireError::Protocol(format!("greeting was {code} {text}")));
        }

        let user = if site.user.is_empty() {
            "anonymous".to_string()
        } else {
            site.user.clone()
        };
        let pass = if site.password.is_empty() {
            "depot_ftp@depot.example".to_string()
        } else {
            site.password.clone()
        };

        if proxied {
            // the proxy login script is an ordered command list with
            // well-known substitutions, nothing more
            let proxy = Uri::parse(&config.find("Acquire::ftp::Proxy", ""));
            let port = site.port.max(DEFAULT_PORT).to_string();
            let vars: Vec<(&str, &str)> = vec![
                ("$(PROXY_USER)", proxy.user.as_str()),
                ("$(PROXY_PASS)", proxy.password.as_str()),
                ("$(SITE_USER)", user.as_str()),
                ("$(SITE_PASS)", pass.as_str()),
                ("$(SITE_PORT)", port.as_str()),
                ("$(SITE)", site.host.as_str()),
            ];
            for command in config.find_vector("Acquire::ftp::ProxyLogin") {
                let line = subst_vars(&command, &vars);
                let (code, text) = conn.send(&line)?;
                if code >= 400 {
                    return Err(AcquireError::Protocol(format!(
                        "proxy login command {line:?} answered {code} {text}"
                    )));
                }
            }
            return Ok(());
        }

        let (code, _) = conn.expect(&format!("USER {user}"), &[230, 331])?;
        if code == 331 {
            conn.expect(&format!("PASS {pass}"), &[230, 202])?;
        }
        conn.user = user;
        Ok(())
    }

    fn ensure_conn(&mut self, io: &mut MethodIo, site: &Uri) -> Result<&mut FtpConn> {
        let stale = !matches!(&self.conn, Some(c) if c.host == site.host);
        if stale {
            let timeout = Self::timeout(&io.config);
            let proxy_spec = io
                .config
                .find_opt("Acquire::ftp::Proxy")
                .or_else(|| std::env::var("ftp_proxy").ok());
            let proxied = proxy_spec.is_some();
            let (host, port) = match &proxy_spec {
                Some(spec) => {
                    let proxy = Uri::parse(spec);
                    (proxy.host.clone(), proxy.port.max(DEFAULT_PORT))
                }
                None => (
                    site.host.clone(),
                    if site.port == 0 { DEFAULT_PORT } else { site.port },
                ),
            };

            io.status(&format!("Connecting to {host}"))?;
            let fd = connect_to(&host, port, timeout, CONNECTION_ATTEMPT_DELAY)?;
            let mut conn = FtpConn {
                fd,
                reader: WireReader::new(timeout),
                timeout,
                host: site.host.clone(),
                user: String::new(),
            };
            Self::login(&mut conn, &io.config, site, proxied)?;
            conn.expect("TYPE I", &[200])?;
            self.conn = Some(conn);
        }
        Ok(self.conn.as_mut().unwrap())
    }

    /// Open a data connection: EPSV preferred, PASV fallback, an
    /// active PORT listener as the last resort.
    fn data_connection(conn: &mut FtpConn) -> Result<DataChannel> {
        if let Ok((_, text)) = conn.expect("EPSV", &[229]) {
            // 229 Entering Extended Passive Mode (|||6446|)
            if let Some(port) = text
                .split('|')
                .nth(3)
                .and_then(|p| p.parse::<u16>().ok())
            {
                let host = conn.host.clone();
                let fd = connect_to(&host, port, conn.timeout, CONNECTION_ATTEMPT_DELAY)?;
                return Ok(DataChannel::Connected(fd));
            }
        }

        if let Ok((_, text)) = conn.expect("PASV", &[227]) {
            // 227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)
            if let Some(spec) = text.split('(').nth(1).and_then(|s| s.split(')').next()) {
                let parts: Vec<u16> = spec
                    .split(',')
                    .filter_map(|p| p.trim().parse().ok())
                    .collect();
                if parts.len() == 6 {
                    let host = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
                    let port = parts[4] * 256 + parts[5];
                    let fd = connect_to(&host, port, conn.timeout, CONNECTION_ATTEMPT_DELAY)?;
                    return Ok(DataChannel::Connected(fd));
                }
            }
        }

        // active mode: listen next to the control connection
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        let local: SocketAddr = listener.local_addr()?;
        let port = local.port();
        let ip = match local.ip() {
            std::net::IpAddr::V4(v4) => v4.octets(),
            std::net::IpAddr::V6(_) => [0, 0, 0, 0],
        };
        let command = format!(
            "PORT {},{},{},{},{},{}",
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            port / 256,
            port % 256
        );
        conn.expect(&command, &[200])?;
        Ok(DataChannel::Listening(listener))
    }

    fn stat_remote(conn: &mut FtpConn, path: &str) -> (Option<u64>, Option<DateTime<Utc>>) {
        let size = conn
            .send(&format!("SIZE {path}"))
            .ok()
            .filter(|(code, _)| *code == 213)
            .and_then(|(_, text)| text.trim().parse().ok());
        let mtime = conn
            .send(&format!("MDTM {path}"))
            .ok()
            .filter(|(code, _)| *code == 213)
            .and_then(|(_, text)| parse_ftp_mdtm(text.trim()));
        (size, mtime)
    }
}

enum DataChannel {
    Connected(Box<dyn MethodFd>),
    Listening(TcpListener),
}

impl DataChannel {
    fn establish(self) -> Result<Box<dyn MethodFd>> {
        match self {
            DataChannel::Connected(fd) => Ok(fd),
            DataChannel::Listening(listener) => {
                let (stream, _) = listener.accept()?;
                Ok(Box::new(TcpFd::new(stream)))
            }
        }
    }
}

impl MethodHandler for FtpMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        let site = Uri::parse(&item.uri);
        let path = depot_util::dequote_string(&site.path);

        let conn = self.ensure_conn(io, &site)?;
        let (size, mtime) = Self::stat_remote(conn, &path);

        // If-Modified-Since equivalent over MDTM
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

        let resume_from = std::fs::metadata(&item.dest_file)
            .map(|m| m.len())
            .unwrap_or(0);

        io.uri_start(item, size, mtime, resume_from)?;

        let channel = Self::data_connection(conn)?;
        if resume_from > 0 {
            conn.expect(&format!("REST {resume_from}"), &[350])?;
        }
        let (code, text) = conn.send(&format!("RETR {path}"))?;
        if code == 550 {
            return Err(AcquireError::NotFound(item.uri.clone()));
        }
        if !matches!(code, 125 | 150) {
            return Err(AcquireError::Protocol(format!("RETR answered {code} {text}")));
        }

        let mut data = channel.establish()?;
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
            let got = data.read(&mut buf)?;
            if got == 0 {
                break;
            }
            written += got as u64;
            if let Some(max) = item.maximum_size {
                if written > max {
                    return Err(AcquireError::MaximumSizeExceeded(max));
                }
            }
            hasher.add(&buf[..got]);
            file.write_all(&buf[..got])?;
        }
        data.close()?;
        file.close()?;

        let (code, text) = conn.read_reply()?;
        if code != 226 && code != 250 {
            return Err(AcquireError::Protocol(format!(
                "transfer ended with {code} {text}"
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
