//! The acquire-method runtime: wire protocol, fetch queue, connection
//! and proxy layer.
//!
//! Every fetcher runs as a child process the parent scheduler speaks to
//! over stdin/stdout in blank-line-framed messages (`600 URI Acquire`
//! in, `200 URI Start` / `201 URI Done` / `400 URI Failure` out). This
//! crate owns the message grammar, the method main loop with its
//! configuration and privilege-drop handling, and the network plumbing
//! the remote methods share: resolver rotation with interleaved
//! address families, staggered connection attempts, SOCKS5h unwrap and
//! TLS wrap over a stackable transport trait.

pub use self::auth::AuthConf;
pub use self::connect::{connect_to, resolve, wait_fd, CONNECTION_ATTEMPT_DELAY};
pub use self::error::{AcquireError, Result};
pub use self::errorstack::{ErrorStack, Severity};
pub use self::fd::{unwrap_socks, wrap_tls, MethodFd, TcpFd, TlsFd};
pub use self::item::{FetchItem, FetchQueue, FetchResult};
pub use self::message::Message;
pub use self::method::{
    install_signal_handlers, parse_fetch_item, run_method, run_method_on, terminated,
    Capabilities, MethodHandler, MethodIo,
};
pub use self::privs::drop_privileges;
pub use self::srv::{
    order_srv_records, parse_srv_answers, service_refused, NoSrv, SrvRecord, SrvResolver,
};

mod auth;
mod connect;
mod error;
mod errorstack;
mod fd;
mod item;
mod message;
mod method;
mod privs;
mod srv;
