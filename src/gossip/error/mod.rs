//! Error related business logic of `ripple`.
//!
//! Contains the `ErrorKind` enum, as well as other useful extensions
//! of the `std::result::Result` type, to work with our very own
//! `Error` type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type,
/// used to wrap its error in a `ripple::error::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from `ResultWrappedExt`, this trait is used in cases
/// where we want to drop the underlying error type in the `Result`.
/// Having this possibility might be useful when the error type in the
/// `Result` doesn't implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg))
    }
}

/// Wrapper result type for `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

#[derive(Debug)]
enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation,
    /// with kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        let inner = ErrorInner::Simple(kind);
        Error { inner }
    }

    /// Wraps an arbitrary error in an `Error`, with kind of type
    /// `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        let inner = ErrorInner::Wrapped(kind, e.into());
        Error { inner }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
        };
        Error { inner }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(fmt, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(fmt, "{:?}: {}", k, e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::Io, e)
    }
}

impl error::Error for Error {}

/// Distinguishes the broad family of failure a `ripple::error::Error`
/// belongs to, so callers can match on cause instead of parsing the
/// `Display` string.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Generic I/O failure not covered by a more specific variant.
    Io,
    /// `ensure_connection` failed to establish a TCP connection.
    ConnectFailed,
    /// Operation attempted on an already-terminated Socket Owner.
    Closed,
    /// The length-prefixed decoder rejected a frame.
    DecodeFailed,
    /// An inbound frame named a UID absent from the Node Registry.
    UnknownDestination,
    /// `Registry.insert` observed a live entry for the same peer.
    DuplicateConnection,
    /// A Proxy Node has no live Socket Owner to forward through.
    Unreachable,
    /// The configuration property bag failed validation.
    Config,
    /// Failure constructing a bounded-degree neighbor graph.
    Graph,
    /// Failed to build the Tokio runtime during `init`.
    Runtime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_roundtrips_kind() {
        let e = Error::simple(ErrorKind::Closed);
        assert_eq!(e.kind(), ErrorKind::Closed);
    }

    #[test]
    fn wrapped_extension_maps_error() {
        let r: result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::Other, "boom"));
        let e = r.wrapped(ErrorKind::Io).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
        assert!(e.to_string().contains("boom"));
    }

    #[test]
    fn simple_extension_drops_source() {
        let r: result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::Other, "boom"));
        let e = r.simple(ErrorKind::Unreachable).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Unreachable);
    }
}
