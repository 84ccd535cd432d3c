//! Connection manager event monitoring.
//!
//! Provides an event stream for tracking interface binds, accepted and
//! closed connections, and runtime failures.

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Manager lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// An interface pair was bound and is being watched.
    Bound {
        address: String,
        local: SocketAddr,
    },

    /// Binding an interface failed; nothing was added to the table.
    BindFailed {
        address: String,
        reason: String,
    },

    /// A client connection was accepted and is being watched.
    Accepted {
        peer: SocketAddr,
        fd: RawFd,
    },

    /// Accepting on a ready listener failed.
    AcceptFailed {
        listener: RawFd,
        reason: String,
    },

    /// Reading from a client failed; a `Disconnected` follows.
    ReadFailed {
        fd: RawFd,
        reason: String,
    },

    /// A client was closed and removed from the table.
    Disconnected {
        fd: RawFd,
    },

    /// The manager closed every remaining descriptor.
    Shutdown {
        closed: usize,
    },
}

impl fmt::Display for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound { address, local } => write!(f, "Bound {address} on {local}"),
            Self::BindFailed { address, reason } => {
                write!(f, "Bind failed for {address}: {reason}")
            }
            Self::Accepted { peer, fd } => {
                write!(f, "Accepted connection from {peer} on descriptor {fd}")
            }
            Self::AcceptFailed { listener, reason } => {
                write!(f, "Accept failed on listener {listener}: {reason}")
            }
            Self::ReadFailed { fd, reason } => write!(f, "Read failed on descriptor {fd}: {reason}"),
            Self::Disconnected { fd } => write!(f, "Closed descriptor {fd}"),
            Self::Shutdown { closed } => write!(f, "Shut down, closed {closed} descriptors"),
        }
    }
}

/// Handle for receiving manager events.
pub type EventMonitor = flume::Receiver<ManagerEvent>;

/// Sending half held by the manager.
pub type EventSender = flume::Sender<ManagerEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (EventSender, EventMonitor) {
    flume::unbounded()
}
