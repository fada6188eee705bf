use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use once_cell::sync::Lazy;

use crate::error::{AcquireError, Result};
use crate::fd::{MethodFd, TcpFd};

/// Default stagger between connection attempts to different addresses.
pub const CONNECTION_ATTEMPT_DELAY: Duration = Duration::from_millis(250);

/// Block until `fd` is readable (or writable), retrying on EINTR.
/// A timeout reports [`AcquireError::Timeout`].
pub fn wait_fd(fd: RawFd, for_write: bool, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AcquireError::Timeout(timeout.as_secs()));
        }
        let flags = if for_write {
            PollFlags::POLLOUT
        } else {
            PollFlags::POLLIN
        };
        let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, flags)];
        let millis = remaining.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => continue,
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(AcquireError::Io(std::io::Error::from(e))),
        }
    }
}

/// Remembers which resolved address worked last per `(host, port)` so
/// reconnects continue from it instead of starting over.
static LAST_USED: Lazy<Mutex<HashMap<(String, u16), SocketAddr>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn interleave_families(addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let (v6, v4): (Vec<_>, Vec<_>) = addrs.into_iter().partition(|a| a.is_ipv6());
    let mut out = Vec::with_capacity(v4.len() + v6.len());
    let mut six = v6.into_iter();
    let mut four = v4.into_iter();
    loop {
        match (six.next(), four.next()) {
            (None, None) => break,
            (a, b) => {
                out.extend(a);
                out.extend(b);
            }
        }
    }
    out
}

/// Resolve `host:port` and order the result: families interleaved for
/// happy eyeballs, rotated so the last successful address goes first.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            // the libc resolver folds EAI_AGAIN into a generic error;
            // treat would-block-ish failures as temporary
            let transient = e.kind() == std::io::ErrorKind::WouldBlock;
            AcquireError::ResolveFailure {
                host: host.to_string(),
                transient,
            }
        })?
        .collect();
    if addrs.is_empty() {
        return Err(AcquireError::ResolveFailure {
            host: host.to_string(),
            transient: false,
        });
    }

    let mut ordered = interleave_families(addrs);
    let key = (host.to_string(), port);
    if let Some(last) = LAST_USED.lock().unwrap().get(&key) {
        if let Some(pos) = ordered.iter().position(|a| a == last) {
            ordered.rotate_left(pos);
        }
    }
    Ok(ordered)
}

struct Attempt {
    fd: OwnedFd,
    addr: SocketAddr,
}

fn start_connect(addr: SocketAddr) -> Result<Attempt> {
    use nix::sys::socket::{
        connect, socket, AddressFamily, SockFlag, SockType, SockaddrStorage,
    };

    let family = if addr.is_ipv6() {
        AddressFamily::Inet6
    } else {
        AddressFamily::Inet
    };
    let fd = socket(
        family,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| AcquireError::Io(std::io::Error::from(e)))?;

    let storage = SockaddrStorage::from(addr);
    match connect(fd.as_raw_fd(), &storage) {
        Ok(()) | Err(nix::errno::Errno::EINPROGRESS) => Ok(Attempt { fd, addr }),
        Err(nix::errno::Errno::ECONNREFUSED) => {
            Err(AcquireError::ConnectionRefused(addr.to_string()))
        }
        Err(e) => Err(AcquireError::Io(std::io::Error::from(e))),
    }
}

fn take_winner(attempt: Attempt, host: &str, port: u16) -> Result<TcpStream> {
    use nix::sys::socket::{getsockopt, sockopt};

    let err = getsockopt(&attempt.fd, sockopt::SocketError)
        .map_err(|e| AcquireError::Io(std::io::Error::from(e)))?;
    if err != 0 {
        let io = std::io::Error::from_raw_os_error(err);
        return Err(match io.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                AcquireError::ConnectionRefused(attempt.addr.to_string())
            }
            std::io::ErrorKind::TimedOut => {
                AcquireError::ConnectionTimedOut(attempt.addr.to_string())
            }
            _ => AcquireError::Io(io),
        });
    }

    LAST_USED
        .lock()
        .unwrap()
        .insert((host.to_string(), port), attempt.addr);

    let stream = unsafe { TcpStream::from_raw_fd(attempt.fd.into_raw_fd()) };
    stream.set_nonblocking(false)?;
    Ok(stream)
}

/// Connect to `host:port` with interleaved-family attempts: start the
/// first address, add the next one every `attempt_delay` while nothing
/// has completed, and take the first socket that reports success.
pub fn connect_to(
    host: &str,
    port: u16,
    timeout: Duration,
    attempt_delay: Duration,
) -> Result<Box<dyn MethodFd>> {
    let addrs = resolve(host, port)?;
    let deadline = Instant::now() + timeout;
    let mut pending = addrs.into_iter();
    let mut in_flight: Vec<Attempt> = Vec::new();
    let mut last_error: Option<AcquireError> = None;

    loop {
        if in_flight.is_empty() {
            match pending.next() {
                Some(addr) => match start_connect(addr) {
                    Ok(attempt) => in_flight.push(attempt),
                    Err(e) => {
                        last_error = Some(e);
                        continue;
                    }
                },
                None => {
                    return Err(last_error.unwrap_or_else(|| {
                        AcquireError::ConnectionTimedOut(format!("{host}:{port}"))
                    }))
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AcquireError::ConnectionTimedOut(format!("{host}:{port}")));
        }
        let slice = remaining.min(attempt_delay);

        let ready = {
            let mut fds: Vec<PollFd> = in_flight
                .iter()
                .map(|a| {
                    let borrowed =
                        unsafe { std::os::unix::io::BorrowedFd::borrow_raw(a.fd.as_raw_fd()) };
                    PollFd::new(borrowed, PollFlags::POLLOUT)
                })
                .collect();
            let millis = slice.as_millis().min(u16::MAX as u128) as u16;
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => None,
                Ok(_) => fds
                    .iter()
                    .position(|f| f.revents().is_some_and(|r| !r.is_empty())),
                Err(nix::errno::Errno::EINTR) => None,
                Err(e) => return Err(AcquireError::Io(std::io::Error::from(e))),
            }
        };

        match ready {
            Some(index) => {
                let attempt = in_flight.swap_remove(index);
                match take_winner(attempt, host, port) {
                    Ok(stream) => {
                        // abort the losers by dropping their sockets
                        in_flight.clear();
                        return Ok(Box::new(TcpFd::new(stream)));
                    }
                    Err(e) => {
                        last_error = Some(e);
                        if in_flight.is_empty() && pending.len() == 0 {
                            return Err(last_error.unwrap());
                        }
                    }
                }
            }
            None => {
                // stagger: bring the next address into the race
                if let Some(addr) = pending.next() {
                    match start_connect(addr) {
                        Ok(attempt) => in_flight.push(attempt),
                        Err(e) => last_error = Some(e),
                    }
                }
            }
        }
    }
}
