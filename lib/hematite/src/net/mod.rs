//! Socket plumbing: listener and dial construction plus the synchronous
//! deadline-bounded transfer helpers used by replication.

pub mod endpoint;

use std::fmt;
use std::io;
use std::net;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, PartialEq)]
pub enum NetError {
    /// The operation would block; retry when ready.
    Wait,
    /// A caller-supplied deadline expired.
    Timeout,
    /// The peer went away mid-transfer.
    Closed,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => NetError::Wait,
            io::ErrorKind::TimedOut => NetError::Timeout,
            kind => NetError::Io(kind),
        }
    }
}

impl From<net::AddrParseError> for NetError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetError::AddrParse
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetError::Wait => write!(f, "resource temporarily unavailable"),
            NetError::Timeout => write!(f, "operation timed out"),
            NetError::Closed => write!(f, "connection closed by peer"),
            NetError::AddrParse => write!(f, "invalid address"),
            NetError::Io(kind) => write!(f, "{:?}", kind),
        }
    }
}
