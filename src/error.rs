//! Crate-wide error classification (spec §7).
//!
//! Errors fall into four categories that the worker runtime and the
//! dispatcher treat differently: client errors are reported to the
//! caller verbatim, staleness errors trigger a cache flush and a
//! worker retry, resource errors are reported and may close the
//! connection, and fatal errors indicate a broken invariant and abort
//! the process.

use std::fmt;

/// POSIX-ish errno used in `RERROR` replies and in envoy-to-envoy RPCs.
pub type Errno = i32;

pub const EPERM: Errno = 1;
pub const ENOENT: Errno = 2;
pub const EIO: Errno = 5;
pub const EBADF: Errno = 9;
pub const EACCES: Errno = 13;
pub const EEXIST: Errno = 17;
pub const ENOTDIR: Errno = 20;
pub const EISDIR: Errno = 21;
pub const EINVAL: Errno = 22;
pub const ENOMEM: Errno = 12;
pub const ENOTEMPTY: Errno = 39;
pub const EMSGSIZE: Errno = 90;

/// Errors produced anywhere in the control plane.
#[derive(Debug)]
pub enum Error {
    /// Bad fid, bad name, permission denied, name too long, etc.
    /// Reported to the caller; never retried.
    Client(Errno, &'static str),
    /// A peer answered `EBADF` during a walk, or a lease changed out
    /// from under an in-flight operation. Caught by the walk engine:
    /// flush the walk cache and re-dispatch the transaction.
    Stale(&'static str),
    /// Out of memory, message too large to encode. `EMSGSIZE` is a
    /// protocol violation and the caller should close the connection.
    Resource(Errno, &'static str),
    /// Broken invariant. Programmer error; the process should abort
    /// rather than continue in an inconsistent state.
    Fatal(String),
}

impl Error {
    pub fn client(errno: Errno, msg: &'static str) -> Self {
        Error::Client(errno, msg)
    }

    pub fn errno(&self) -> Errno {
        match self {
            Error::Client(e, _) => *e,
            Error::Stale(_) => EBADF,
            Error::Resource(e, _) => *e,
            Error::Fatal(_) => EIO,
        }
    }

    /// Whether this error should cause the worker to flush the walk
    /// cache and re-dispatch the transaction from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Stale(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Client(e, msg) => write!(f, "client error {e}: {msg}"),
            Error::Stale(msg) => write!(f, "stale: {msg}"),
            Error::Resource(e, msg) => write!(f, "resource error {e}: {msg}"),
            Error::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Raises a fatal invariant violation. Logs at `error` then aborts the
/// process, an `assert!`-as-invariant style routed through `tracing`
/// first so the cause is captured.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!(invariant = %msg, "fatal invariant violation");
        panic!("invariant violation: {msg}");
    }};
}
