//! Pipelined HTTP/1.1 fetcher.
//!
//! One connection per authority; up to `Pipeline-Depth` requests are
//! stacked before the first response is read. Responses are matched to
//! requests in order; a server that answers out of order is caught by
//! comparing payload hashes against the other in-flight requests,
//! recovered from once, and never pipelined to again.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_acquire::{
    connect_to, unwrap_socks, wrap_tls, AcquireError, Capabilities, FetchItem, FetchResult,
    MethodFd, MethodHandler, MethodIo, Result, CONNECTION_ATTEMPT_DELAY,
};
use depot_hashes::{HashStringList, MultiHasher};
use depot_io::{BufFile, Mode, OpenOptions};
use depot_util::{base64_encode, format_rfc1123, quote_string, Configuration, Uri};

use self::wire::{read_body, read_response, Encoding, Response, WireReader};

pub(crate) mod wire;

pub const DEFAULT_PIPELINE_DEPTH: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Authority {
    tls: bool,
    host: String,
    port: u16,
}

impl Authority {
    fn of(uri: &Uri) -> Authority {
        let tls = uri.access.ends_with("https");
        Authority {
            tls,
            host: uri.host.clone(),
            port: match uri.port {
                0 if tls => 443,
                0 => 80,
                p => p,
            },
        }
    }

    fn host_header(&self) -> String {
        let default = if self.tls { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

struct ServerState {
    fd: Box<dyn MethodFd>,
    authority: Authority,
    reader: WireReader,
    /// requests go through a forwarding proxy in absolute-URI form
    proxied_plain: bool,
    persistent: bool,
    pipeline_allowed: bool,
    ranges_allowed: bool,
}

/// The fetcher; also usable in-process by the mirror method.
pub struct HttpMethod {
    server: Option<ServerState>,
    warned_misorder: bool,
    pipeline_disabled: bool,
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMethod {
    pub fn new() -> Self {
        Self {
            server: None,
            warned_misorder: false,
            pipeline_disabled: false,
        }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities::new("http", "1.2")
            .send_config()
            .pipeline()
            .send_uri_encoded()
    }

    fn timeout(config: &Configuration) -> Duration {
        Duration::from_secs(config.find_int("Acquire::http::Timeout", 120).max(1) as u64)
    }

    fn proxy_for(config: &Configuration, authority: &Authority) -> Option<Uri> {
        let scope = if authority.tls { "https" } else { "http" };
        let specific = config.find_opt(&format!("Acquire::{scope}::Proxy::{}", authority.host));
        let general = config.find_opt(&format!("Acquire::{scope}::Proxy"));
        let env = std::env::var(format!("{scope}_proxy")).ok();

        let choice = specific.or(general).or_else(|| {
            // no_proxy suffix matches exempt the host
            if let Ok(no_proxy) = std::env::var("no_proxy") {
                for entry in no_proxy.split(',') {
                    let entry = entry.trim().trim_start_matches('.');
                    if !entry.is_empty() && authority.host.ends_with(entry) {
                        return None;
                    }
                }
            }
            env
        })?;

        if choice.eq_ignore_ascii_case("direct") || choice.is_empty() {
            return None;
        }
        Some(Uri::parse(&choice))
    }

    fn open_connection(
        &mut self,
        io: &mut MethodIo,
        authority: &Authority,
    ) -> Result<ServerState> {
        let timeout = Self::timeout(&io.config);
        let proxy = Self::proxy_for(&io.config, authority);
        let scope = if authority.tls { "https" } else { "http" };
        let mut proxied_plain = false;

        let fd: Box<dyn MethodFd> = match &proxy {
            Some(proxy) if proxy.access == "socks5h" => {
                io.status(&format!(
                    "Connecting to {} (SOCKS5h proxy {})",
                    authority.host, proxy.host
                ))?;
                let port = if proxy.port == 0 { 1080 } else { proxy.port };
                let raw = connect_to(&proxy.host, port, timeout, CONNECTION_ATTEMPT_DELAY)?;
                let tunneled =
                    unwrap_socks(raw, proxy, &authority.host, authority.port, timeout)?;
                if authority.tls {
                    wrap_tls(
                        tunneled,
                        &authority.host,
                        &io.config,
                        &format!("Acquire::{scope}"),
                    )?
                } else {
                    tunneled
                }
            }
            Some(proxy) => {
                io.status(&format!(
                    "Connecting to {} via proxy {}",
                    authority.host, proxy.host
                ))?;
                let port = if proxy.port == 0 { 8080 } else { proxy.port };
                let mut raw = connect_to(&proxy.host, port, timeout, CONNECTION_ATTEMPT_DELAY)?;
                if authority.tls {
                    self.connect_tunnel(raw.as_mut(), proxy, authority, timeout)?;
                    wrap_tls(
                        raw,
                        &authority.host,
                        &io.config,
                        &format!("Acquire::{scope}"),
                    )?
                } else {
                    proxied_plain = true;
                    raw
                }
            }
            None => {
                io.status(&format!("Connecting to {}", authority.host))?;
                let raw = connect_to(
                    &authority.host,
                    authority.port,
                    timeout,
                    CONNECTION_ATTEMPT_DELAY,
                )?;
                if authority.tls {
                    wrap_tls(
                        raw,
                        &authority.host,
                        &io.config,
                        &format!("Acquire::{scope}"),
                    )?
                } else {
                    raw
                }
            }
        };

        Ok(ServerState {
            fd,
            authority: authority.clone(),
            reader: WireReader::new(timeout),
            proxied_plain,
            persistent: true,
            pipeline_allowed: !self.pipeline_disabled,
            ranges_allowed: true,
        })
    }

    fn connect_tunnel(
        &self,
        fd: &mut dyn MethodFd,
        proxy: &Uri,
        authority: &Authority,
        timeout: Duration,
    ) -> Result<()> {
        let mut request = format!(
            "CONNECT {0}:{1} HTTP/1.1\r\nHost: {0}:{1}\r\n",
            authority.host, authority.port
        );
        if !proxy.user.is_empty() {
            let token = base64_encode(format!("{}:{}", proxy.user, proxy.password).as_bytes());
            request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
        }
        request.push_str("\r\n");
        fd.write_all(request.as_bytes())?;

        let mut reader = WireReader::new(timeout);
        let response = read_response(&mut reader, fd)?;
        if response.status / 100 != 2 {
            return Err(AcquireError::Protocol(format!(
                "proxy refused CONNECT with status {}",
                response.status
            )));
        }
        Ok(())
    }

    fn server_for(
        &mut self,
        io: &mut MethodIo,
        authority: &Authority,
    ) -> Result<&mut ServerState> {
        let reusable = matches!(
            &self.server,
            Some(s) if s.authority == *authority && s.persistent
        );
        if !reusable {
            let server = self.open_connection(io, authority)?;
            self.server = Some(server);
        }
        Ok(self.server.as_mut().unwrap())
    }

    fn build_request(
        server: &ServerState,
        config: &Configuration,
        uri: &Uri,
        resume_from: u64,
        partial_mtime: Option<DateTime<Utc>>,
        last_modified: Option<DateTime<Utc>>,
    ) -> String {
        // quote the request path but leave `~` and query syntax alone
        let path = quote_string(&depot_util::dequote_string(&uri.path), "+ \"{}|\\^[]<>");
        let target = if server.proxied_plain {
            format!(
                "http://{}{}",
                server.authority.host_header(),
                if path.is_empty() { "/" } else { &path }
            )
        } else if path.is_empty() {
            "/".to_string()
        } else {
            path.clone()
        };

        let mut req = format!("GET {target} HTTP/1.1\r\n");
        req.push_str(&format!("Host: {}\r\n", server.authority.host_header()));
        if !server.proxied_plain {
            req.push_str("Connection: keep-alive\r\n");
        }

        if resume_from > 0 && server.ranges_allowed {
            req.push_str(&format!("Range: bytes={resume_from}-\r\n"));
            if let Some(mtime) = partial_mtime {
                req.push_str(&format!("If-Range: {}\r\n", format_rfc1123(mtime)));
            }
        } else if let Some(mtime) = last_modified {
            req.push_str(&format!("If-Modified-Since: {}\r\n", format_rfc1123(mtime)));
        }

        if config.find_bool("Acquire::http::No-Cache", false) {
            req.push_str("Cache-Control: no-cache\r\n");
        } else {
            let max_age = config.find_int("Acquire::http::Max-Age", 0);
            if max_age > 0 {
                req.push_str(&format!("Cache-Control: max-age={max_age}\r\n"));
            }
        }
        if config.find_bool("Acquire::http::No-Store", false) {
            req.push_str("Cache-Control: no-store\r\n");
        }

        let agent = config.find("Acquire::http::User-Agent", "depot-http/1.2");
        req.push_str(&format!("User-Agent: {agent}\r\n"));

        if !uri.user.is_empty() {
            let token = base64_encode(format!("{}:{}", uri.user, uri.password).as_bytes());
            req.push_str(&format!("Authorization: Basic {token}\r\n"));
        }

        req.push_str("\r\n");
        req
    }

    /// Decide the redirect target, enforcing the scheme policy.
    fn redirect_target(item: &FetchItem, location: &str) -> Result<String> {
        let current = Uri::parse(&item.uri);
        let next = if location.contains("://") {
            location.to_string()
        } else if location.starts_with('/') {
            let mut base = current.clone();
            base.path = location.to_string();
            base.to_string()
        } else {
            let mut base = current.clone();
            let dir = match base.path.rfind('/') {
                Some(i) => &base.path[..=i],
                None => "/",
            };
            base.path = format!("{dir}{location}");
            base.to_string()
        };

        let next_uri = Uri::parse(&next);
        if next_uri.access.contains('+') {
            return Err(AcquireError::RedirectForbidden(next));
        }
        if next_uri.access != current.access
            && !(current.access == "http" && next_uri.access == "https")
        {
            return Err(AcquireError::RedirectForbidden(next));
        }
        if next == item.uri {
            return Err(AcquireError::RedirectLoop);
        }
        Ok(next)
    }

    /// Hash the first `prefix` bytes of `path`, continuing the hasher
    /// over the appended body afterwards.
    fn prefix_hasher(
        path: &Path,
        prefix: u64,
        expected: &HashStringList,
    ) -> Result<MultiHasher> {
        let mut hasher = if expected.is_empty() {
            MultiHasher::new()
        } else {
            MultiHasher::for_list(expected)
        };
        if prefix > 0 {
            let mut file = std::fs::File::open(path)?;
            hasher.add_file(&mut file, Some(prefix))?;
        }
        Ok(hasher)
    }

    fn finalize(
        io: &mut MethodIo,
        item: &FetchItem,
        hashes: HashStringList,
        size: u64,
        resume_point: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(when) = last_modified {
            let _ = depot_io::set_file_mtime(&item.dest_file, when.into());
        }
        let result = FetchResult {
            filename: item.dest_file.clone(),
            size,
            last_modified,
            hashes,
            resume_point,
            ims_hit: false,
            ..FetchResult::default()
        };
        io.uri_done(item, &result)
    }

    fn fetch_group(
        &mut self,
        io: &mut MethodIo,
        group: Vec<FetchItem>,
        requeue: &mut VecDeque<FetchItem>,
    ) -> Result<()> {
        let Some(first) = group.first() else {
            return Ok(());
        };
        let authority = Authority::of(&Uri::parse(&first.uri));
        let config = io.config.clone();

        // write all requests up front (the pipeline fill); a dead or
        // unreachable server fails every item of the group, not the
        // whole method loop
        let sent = (|| -> Result<()> {
            let server = self.server_for(io, &authority)?;
            for item in &group {
                let uri = Uri::parse(&item.uri);
                let resume_from = match std::fs::metadata(&item.dest_file) {
                    Ok(meta) if meta.len() > 0 && server.ranges_allowed => meta.len(),
                    _ => 0,
                };
                let partial_mtime = depot_io::file_mtime(&item.dest_file)
                    .ok()
                    .map(DateTime::<Utc>::from);
                let request = Self::build_request(
                    server,
                    &config,
                    &uri,
                    resume_from,
                    partial_mtime,
                    item.last_modified,
                );
                server.fd.write_all(request.as_bytes())?;
            }
            Ok(())
        })();
        if let Err(error) = sent {
            self.server = None;
            for item in &group {
                io.uri_failure(item, &error)?;
            }
            return Ok(());
        }

        let mut expecting: VecDeque<FetchItem> = group.into();
        while let Some(item) = expecting.pop_front() {
            match self.read_one_response(io, &item, &mut expecting) {
                Ok(()) => {}
                Err(error) => {
                    // this connection is no longer trustworthy
                    self.server = None;
                    io.uri_failure(&item, &error)?;
                    // unanswered requests go back for a fresh attempt
                    while let Some(rest) = expecting.pop_front() {
                        requeue.push_back(rest);
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn read_one_response(
        &mut self,
        io: &mut MethodIo,
        item: &FetchItem,
        expecting: &mut VecDeque<FetchItem>,
    ) -> Result<()> {
        let config = io.config.clone();
        let server = self
            .server
            .as_mut()
            .ok_or_else(|| AcquireError::Protocol("no server connection".into()))?;
        let response = read_response(&mut server.reader, server.fd.as_mut())?;

        if response.connection_close {
            server.persistent = false;
        }
        if response.ranges_denied {
            server.ranges_allowed = false;
        }

        match response.status {
            304 => {
                let _ = std::fs::remove_file(&item.dest_file);
                let result = FetchResult {
                    filename: item.dest_file.clone(),
                    ims_hit: true,
                    last_modified: item.last_modified,
                    ..FetchResult::default()
                };
                io.uri_done(item, &result)
            }
            300 | 306 => Err(AcquireError::Protocol(format!(
                "unsupported status {}",
                response.status
            ))),
            status if (300..400).contains(&status) => {
                Self::drain_body(server, &response)?;
                let location = response.location.clone().ok_or_else(|| {
                    AcquireError::Protocol(format!("{status} without Location"))
                })?;
                let next = Self::redirect_target(item, &location)?;
                io.redirect(item, &next)
            }
            416 => {
                Self::drain_body(server, &response)?;
                if !item.expected_hashes.is_empty()
                    && item.expected_hashes.verify_file(&item.dest_file).unwrap_or(false)
                {
                    let size = std::fs::metadata(&item.dest_file)?.len();
                    let mut hasher = MultiHasher::for_list(&item.expected_hashes);
                    hasher.add_file(&mut std::fs::File::open(&item.dest_file)?, None)?;
                    return Self::finalize(io, item, hasher.result(), size, 0, None);
                }
                let _ = std::fs::remove_file(&item.dest_file);
                Err(AcquireError::Protocol(
                    "range request rejected, partial file discarded".into(),
                ))
            }
            200 | 206 => {
                let start_pos = if response.status == 206 {
                    response.start_pos
                } else {
                    0
                };
                let mut hasher =
                    Self::prefix_hasher(&item.dest_file, start_pos, &item.expected_hashes)?;

                let total_size = if response.total_size > 0 {
                    response.total_size
                } else {
                    start_pos + response.content_length
                };
                io.uri_start(item, Some(total_size), response.last_modified, start_pos)?;

                let mut file = BufFile::open(
                    &item.dest_file,
                    Mode::ReadWrite,
                    OpenOptions::new().create(true),
                )?;
                file.truncate(start_pos)?;
                file.seek(start_pos)?;

                let mut written = start_pos;
                let maximum = item.maximum_size;
                let body = read_body(
                    &mut server.reader,
                    server.fd.as_mut(),
                    &response,
                    |bytes| {
                        written += bytes.len() as u64;
                        if let Some(max) = maximum {
                            if written > max {
                                return Err(AcquireError::MaximumSizeExceeded(max));
                            }
                        }
                        hasher.add(bytes);
                        file.write_all(bytes).map_err(AcquireError::from)
                    },
                );
                match body {
                    Ok(()) => file.close()?,
                    Err(error) => {
                        // keep the partial for a later resume
                        let _ = file.close();
                        return Err(error);
                    }
                }

                let hashes = hasher.result();
                if !item.expected_hashes.is_empty()
                    && !item.expected_hashes.matches(&hashes)
                {
                    // pipelining servers have been seen answering for
                    // the wrong request; check the other in-flight ones
                    if let Some(pos) = expecting
                        .iter()
                        .position(|other| other.expected_hashes.matches(&hashes))
                    {
                        let other = expecting
                            .remove(pos)
                            .expect("position came from the same queue");
                        std::fs::rename(&item.dest_file, &other.dest_file)?;
                        if !self.warned_misorder {
                            self.warned_misorder = true;
                            io.warning(
                                "Invalid response ordering detected; \
                                 disabling pipelining for this server",
                            )?;
                        }
                        self.pipeline_disabled = true;
                        if let Some(server) = self.server.as_mut() {
                            server.pipeline_allowed = false;
                        }
                        Self::finalize(
                            io,
                            &other,
                            hashes,
                            written,
                            0,
                            response.last_modified,
                        )?;
                        // the mismatched item waits for the response
                        // that was meant for the other request
                        expecting.insert(pos, item.clone());
                        return Ok(());
                    }

                    let _ = std::fs::remove_file(&item.dest_file);
                    return Err(AcquireError::HashMismatch {
                        expected: item
                            .expected_hashes
                            .best()
                            .map(|h| h.to_string())
                            .unwrap_or_default(),
                        actual: hashes
                            .best()
                            .map(|h| h.to_string())
                            .unwrap_or_default(),
                    });
                }

                Self::finalize(io, item, hashes, written, start_pos, response.last_modified)
            }
            404 | 410 => {
                Self::drain_body(server, &response)?;
                Err(AcquireError::NotFound(item.uri.clone()))
            }
            status => {
                Self::drain_body(server, &response)?;
                let _ = config;
                Err(AcquireError::Protocol(format!("server answered {status}")))
            }
        }
    }

    /// Read and discard a body we do not care about, so the connection
    /// stays usable for the next response.
    fn drain_body(server: &mut ServerState, response: &Response) -> Result<()> {
        if !response.have_content {
            return Ok(());
        }
        if response.encoding == Encoding::Closes {
            server.persistent = false;
            server.reader.discard();
            return Ok(());
        }
        read_body(&mut server.reader, server.fd.as_mut(), response, |_| Ok(()))
    }

    fn pipeline_depth(&self, config: &Configuration) -> usize {
        let server_refuses = matches!(&self.server, Some(s) if !s.pipeline_allowed);
        if self.pipeline_disabled || server_refuses {
            return 1;
        }
        config
            .find_int("Acquire::http::Pipeline-Depth", DEFAULT_PIPELINE_DEPTH as i64)
            .clamp(1, 100) as usize
    }
}

impl MethodHandler for HttpMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        self.fetch_many(io, vec![item.clone()])
    }

    fn fetch_many(&mut self, io: &mut MethodIo, items: Vec<FetchItem>) -> Result<()> {
        let mut queue: VecDeque<FetchItem> = items.into();

        // fast-skip: a complete partial that already verifies needs no
        // network round-trip at all
        let mut remaining = VecDeque::new();
        while let Some(item) = queue.pop_front() {
            if !item.expected_hashes.is_empty()
                && item.expected_hashes.usable(None)
                && item
                    .expected_hashes
                    .verify_file(&item.dest_file)
                    .unwrap_or(false)
            {
                let size = std::fs::metadata(&item.dest_file)?.len();
                let mut hasher = MultiHasher::for_list(&item.expected_hashes);
                hasher.add_file(&mut std::fs::File::open(&item.dest_file)?, None)?;
                Self::finalize(io, &item, hasher.result(), size, 0, None)?;
                continue;
            }
            remaining.push_back(item);
        }
        queue = remaining;

        while let Some(item) = queue.pop_front() {
            if depot_acquire::terminated() {
                std::process::exit(100);
            }
            let depth = self.pipeline_depth(&io.config);
            let authority = Authority::of(&Uri::parse(&item.uri));
            let mut group = vec![item];
            while group.len() < depth {
                let same = matches!(
                    queue.front(),
                    Some(next) if Authority::of(&Uri::parse(&next.uri)) == authority
                );
                if !same {
                    break;
                }
                group.push(queue.pop_front().unwrap());
            }
            self.fetch_group(io, group, &mut queue)?;
        }
        Ok(())
    }
}
