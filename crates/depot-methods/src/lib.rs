//! The fetcher executables: each speaks the acquire-method protocol on
//! stdin/stdout and covers one URI scheme family.

pub mod copy;
pub mod ftp;
pub mod http;
pub mod mirror;
pub mod rsh;
pub mod sqv;
pub mod store;

/// Shared executable setup: structured logging to stderr, controlled
/// by the usual environment filter.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
