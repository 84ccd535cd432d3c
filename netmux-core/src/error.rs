//! Netmux Error Types
//!
//! Setup errors are scoped to a single `bind()` call, runtime errors to a
//! single ready descriptor. Only `AllocationFailed` and `PollFailed` abort a
//! `process()` call.

use std::collections::TryReserveError;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use thiserror::Error;

/// Which half of an interface pair a setup error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Stream listener
    Tcp,
    /// Datagram socket sharing the listener's port
    Udp,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// Main error type for connection manager operations
#[derive(Error, Debug)]
pub enum NetError {
    /// The address/port pair is not a numeric socket address
    #[error("couldn't resolve {address} port {port}: {reason}")]
    ResolutionFailed {
        address: String,
        port: String,
        reason: String,
    },

    /// The OS refused to create a socket
    #[error("couldn't make {kind} socket: {source}")]
    SocketCreateFailed {
        kind: SocketKind,
        #[source]
        source: io::Error,
    },

    /// A socket option could not be applied
    #[error("couldn't set {option} on {kind} socket: {source}")]
    SocketOptionFailed {
        kind: SocketKind,
        option: &'static str,
        #[source]
        source: io::Error,
    },

    /// Binding to the resolved address failed
    #[error("couldn't bind {kind} socket to {addr}: {source}")]
    BindFailed {
        kind: SocketKind,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The stream socket could not enter listening mode
    #[error("couldn't listen on {addr}: {source}")]
    ListenFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Accepting a pending connection failed
    #[error("accept failed on listener {listener}: {source}")]
    AcceptFailed {
        listener: RawFd,
        #[source]
        source: io::Error,
    },

    /// Reading from a client connection failed
    #[error("read failed on descriptor {fd}: {source}")]
    ReadFailed {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// The descriptor table could not grow
    #[error("descriptor table couldn't grow past {capacity} entries: {source}")]
    AllocationFailed {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },

    /// The readiness poll itself failed
    #[error("readiness poll failed: {0}")]
    PollFailed(#[source] io::Error),
}

/// Result type alias for connection manager operations
pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Create a resolution error with a reason
    pub fn resolution(address: &str, port: &str, reason: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            address: address.to_string(),
            port: port.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error aborts the current `process()` call
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. } | Self::PollFailed(_))
    }

    /// Check if this error belongs to interface setup
    #[must_use]
    pub const fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFailed { .. }
                | Self::SocketCreateFailed { .. }
                | Self::SocketOptionFailed { .. }
                | Self::BindFailed { .. }
                | Self::ListenFailed { .. }
        )
    }
}
