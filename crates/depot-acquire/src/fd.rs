use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use depot_util::{Configuration, Uri};

use crate::connect::wait_fd;
use crate::error::{AcquireError, Result};

/// A bidirectional transport a method talks through. Implementations
/// stack: a TLS layer keeps an inner `MethodFd`, so SOCKS → TLS chains
/// compose naturally.
pub trait MethodFd: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn close(&mut self) -> Result<()>;
    /// Bytes already decrypted/buffered that a select on the raw fd
    /// would not see.
    fn has_pending(&self) -> bool {
        false
    }
    fn raw_fd(&self) -> RawFd;
}

impl dyn MethodFd + '_ {
    pub fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(AcquireError::Protocol("unexpected end of stream".into()));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Plain TCP transport.
pub struct TcpFd {
    stream: TcpStream,
}

impl TcpFd {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl MethodFd for TcpFd {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// io adapter so a boxed transport can sit under the TLS stream.
struct FdAdapter {
    inner: Box<dyn MethodFd>,
}

impl std::fmt::Debug for FdAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdAdapter").finish_non_exhaustive()
    }
}

impl Read for FdAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).map_err(std::io::Error::other)
    }
}

impl Write for FdAdapter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf).map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// TLS transport over any inner `MethodFd`.
pub struct TlsFd {
    stream: native_tls::TlsStream<FdAdapter>,
    raw: RawFd,
}

fn host_is_ip_literal(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_ok()
}

/// Wrap `inner` in a TLS session towards `host`, honoring the
/// per-method certificate configuration.
pub fn wrap_tls(
    inner: Box<dyn MethodFd>,
    host: &str,
    config: &Configuration,
    config_prefix: &str,
) -> Result<Box<dyn MethodFd>> {
    let raw = inner.raw_fd();
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(ca_file) = config.find_opt(&format!("{config_prefix}::CaInfo")) {
        let pem = std::fs::read(&ca_file)?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| AcquireError::Tls(format!("bad CA certificate {ca_file}: {e}")))?;
        builder.add_root_certificate(cert);
        builder.disable_built_in_roots(true);
    }
    if let (Some(cert), Some(key)) = (
        config.find_opt(&format!("{config_prefix}::SslCert")),
        config.find_opt(&format!("{config_prefix}::SslKey")),
    ) {
        let cert_pem = std::fs::read(&cert)?;
        let key_pem = std::fs::read(&key)?;
        let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)
            .map_err(|e| AcquireError::Tls(format!("bad client certificate {cert}: {e}")))?;
        builder.identity(identity);
    }
    if !config.find_bool(&format!("{config_prefix}::Verify-Peer"), true) {
        builder.danger_accept_invalid_certs(true);
    }
    if !config.find_bool(&format!("{config_prefix}::Verify-Host"), true) {
        builder.danger_accept_invalid_hostnames(true);
    }
    if host_is_ip_literal(host) {
        builder.use_sni(false);
    }

    let connector = builder
        .build()
        .map_err(|e| AcquireError::Tls(e.to_string()))?;
    let stream = connector
        .connect(host, FdAdapter { inner })
        .map_err(|e| AcquireError::Tls(format!("handshake with {host} failed: {e}")))?;

    Ok(Box::new(TlsFd { stream, raw }))
}

impl MethodFd for TlsFd {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown();
        Ok(())
    }

    fn has_pending(&self) -> bool {
        // conservatively false; the buffered-TLS case re-polls
        false
    }

    fn raw_fd(&self) -> RawFd {
        self.raw
    }
}

fn socks_read(fd: &mut dyn MethodFd, buf: &mut [u8], timeout: Duration) -> Result<()> {
    wait_fd(fd.raw_fd(), false, timeout)?;
    fd.read_exact(buf)
}

fn socks_write(fd: &mut dyn MethodFd, buf: &[u8], timeout: Duration) -> Result<()> {
    wait_fd(fd.raw_fd(), true, timeout)?;
    fd.write_all(buf)
}

/// Perform the SOCKS5h handshake of RFC 1928 (with RFC 1929 user/pass
/// auth) over an established proxy connection, asking the proxy to
/// resolve `host` itself.
pub fn unwrap_socks(
    mut fd: Box<dyn MethodFd>,
    proxy: &Uri,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Box<dyn MethodFd>> {
    if host.len() > 255 {
        return Err(AcquireError::Socks(format!(
            "hostname {host} is too long for SOCKS5h"
        )));
    }
    let with_auth = !proxy.user.is_empty() || !proxy.password.is_empty();
    if with_auth && (proxy.user.len() > 255 || proxy.password.len() > 255) {
        return Err(AcquireError::Socks(
            "user and password are too long for SOCKS5 auth".into(),
        ));
    }

    // greeting: offer no-auth, plus user/pass when configured
    if with_auth {
        socks_write(fd.as_mut(), &[0x05, 0x02, 0x00, 0x02], timeout)?;
    } else {
        socks_write(fd.as_mut(), &[0x05, 0x01, 0x00], timeout)?;
    }
    let mut greeting = [0u8; 2];
    socks_read(fd.as_mut(), &mut greeting, timeout)?;
    if greeting[0] != 0x05 {
        return Err(AcquireError::Socks(format!(
            "proxy greets back with wrong version: {}",
            greeting[0]
        )));
    }
    match greeting[1] {
        0x00 => {}
        0x02 if with_auth => {
            let mut auth = vec![0x01, proxy.user.len() as u8];
            auth.extend_from_slice(proxy.user.as_bytes());
            auth.push(proxy.password.len() as u8);
            auth.extend_from_slice(proxy.password.as_bytes());
            socks_write(fd.as_mut(), &auth, timeout)?;

            let mut status = [0u8; 2];
            socks_read(fd.as_mut(), &mut status, timeout)?;
            if status[0] != 0x01 {
                return Err(AcquireError::Socks(format!(
                    "auth status response with wrong version: {}",
                    status[0]
                )));
            }
            if status[1] != 0x00 {
                return Err(AcquireError::Socks(
                    "authorization failure: username or password incorrect?".into(),
                ));
            }
        }
        0x02 => {
            return Err(AcquireError::Socks(
                "proxy negotiated user&pass auth we had not offered".into(),
            ))
        }
        method => {
            return Err(AcquireError::Socks(format!(
                "no common authorization method: {method}"
            )))
        }
    }

    // CONNECT with a hostname request so the proxy resolves it
    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    socks_write(fd.as_mut(), &request, timeout)?;

    let mut response = [0u8; 4];
    socks_read(fd.as_mut(), &mut response, timeout)?;
    if response[0] != 0x05 {
        return Err(AcquireError::Socks(format!(
            "response with wrong version: {}",
            response[0]
        )));
    }
    if response[2] != 0x00 {
        return Err(AcquireError::Socks(format!(
            "unexpected non-zero reserved field: {}",
            response[2]
        )));
    }

    // consume the bound address, remembering the all-zero v4 quirk
    let mut zero_bind = false;
    match response[3] {
        0x01 => {
            let mut addr = [0u8; 6];
            socks_read(fd.as_mut(), &mut addr, timeout)?;
            zero_bind = addr == [0u8; 6];
        }
        0x03 => {
            let mut len = [0u8; 1];
            socks_read(fd.as_mut(), &mut len, timeout)?;
            let mut name = vec![0u8; len[0] as usize + 2];
            socks_read(fd.as_mut(), &mut name, timeout)?;
        }
        0x04 => {
            let mut addr = [0u8; 18];
            socks_read(fd.as_mut(), &mut addr, timeout)?;
        }
        other => {
            return Err(AcquireError::Socks(format!(
                "destination address is of unknown type: {other}"
            )))
        }
    }

    let mut errcode = response[1];
    if errcode != 0x00 {
        // Tor replies TTL-expired for down onion services; the better
        // understood diagnosis is host-unreachable
        if zero_bind && host.ends_with(".onion") {
            if errcode == 0x01 && !onion_name_plausible(host) {
                return Err(AcquireError::Socks(
                    "invalid hostname: onion service name must be either 16 or 56 characters long"
                        .into(),
                ));
            }
            if errcode == 0x06 {
                errcode = 0x04;
            }
        }
        return Err(match errcode {
            0x01 => AcquireError::Socks("general SOCKS server failure".into()),
            0x02 => AcquireError::Socks("connection not allowed by ruleset".into()),
            0x03 => AcquireError::ConnectionTimedOut(format!("{host} (network unreachable)")),
            0x04 => AcquireError::ConnectionTimedOut(format!("{host} (host unreachable)")),
            0x05 => AcquireError::ConnectionRefused(host.to_string()),
            0x06 => AcquireError::Timeout(timeout.as_secs()),
            0x07 => AcquireError::Socks("command not supported".into()),
            0x08 => AcquireError::Socks("address type not supported".into()),
            other => AcquireError::Socks(format!("unknown error {other}")),
        });
    }

    Ok(fd)
}

fn onion_name_plausible(host: &str) -> bool {
    let Some(name) = host.strip_suffix(".onion") else {
        return false;
    };
    let label = name.rsplit('.').next().unwrap_or("");
    label.len() == 16 || label.len() == 56
}
