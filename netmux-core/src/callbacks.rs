//! Event consumers supplied by the embedding application.
//!
//! Any `FnMut(SocketAddr, RawFd)` closure is an [`OnAccept`] and any
//! `FnMut(&[u8])` closure is an [`OnMessage`]; implement the traits directly
//! for stateful handlers.

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Notified once per accepted connection.
pub trait OnAccept {
    /// `peer` is the remote address, `fd` the descriptor now being watched.
    fn on_accept(&mut self, peer: SocketAddr, fd: RawFd);
}

impl<F> OnAccept for F
where
    F: FnMut(SocketAddr, RawFd),
{
    fn on_accept(&mut self, peer: SocketAddr, fd: RawFd) {
        self(peer, fd)
    }
}

/// Notified once per successful read from any client.
///
/// Payloads are raw read chunks: no framing, no reassembly across reads.
pub trait OnMessage {
    /// Handle one chunk read from a client connection.
    fn on_message(&mut self, payload: &[u8]);
}

impl<F> OnMessage for F
where
    F: FnMut(&[u8]),
{
    fn on_message(&mut self, payload: &[u8]) {
        self(payload)
    }
}

/// All accept consumers, in registration order, plus at most one message
/// consumer.
#[derive(Default)]
pub struct CallbackRegistry {
    accept: Vec<Box<dyn OnAccept>>,
    message: Option<Box<dyn OnMessage>>,
}

impl CallbackRegistry {
    /// Create a registry with no consumers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register another accept consumer.
    pub fn add_accept(&mut self, callback: impl OnAccept + 'static) {
        self.accept.push(Box::new(callback));
    }

    /// Install the message consumer, replacing any previous one.
    pub fn set_message(&mut self, callback: impl OnMessage + 'static) {
        self.message = Some(Box::new(callback));
    }

    /// Number of accept consumers.
    pub fn accept_count(&self) -> usize {
        self.accept.len()
    }

    /// Whether a message consumer is installed.
    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    pub(crate) fn notify_accept(&mut self, peer: SocketAddr, fd: RawFd) {
        for callback in &mut self.accept {
            callback.on_accept(peer, fd);
        }
    }

    /// Returns false when no message consumer is installed.
    pub(crate) fn notify_message(&mut self, payload: &[u8]) -> bool {
        match self.message.as_mut() {
            Some(callback) => {
                callback.on_message(payload);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("accept", &self.accept.len())
            .field("message", &self.message.is_some())
            .finish()
    }
}
