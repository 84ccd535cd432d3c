//! Netmux Core
//!
//! This crate contains the building blocks of a single-threaded,
//! readiness-polled connection manager:
//! - Numeric-only interface binding, one TCP listener + one UDP socket per
//!   address on a shared port (`binder`)
//! - Growable descriptor table with O(1) swap-removal (`table`)
//! - The poll loop that accepts clients and reads payloads (`manager`)
//! - Accept / message consumers (`callbacks`)
//! - Lifecycle event stream (`monitor`)
//! - Loop cancellation (`cancel`)
//! - Configuration (`options`) and error types (`error`)
//!
//! Unix only: the loop is built on `poll(2)` and raw descriptors.

// The sys module needs raw poll(2) access
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod binder;
pub mod callbacks;
pub mod cancel;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod options;
pub mod table;

mod sys;

pub mod prelude {
    pub use crate::binder::{resolve, Interface};
    pub use crate::callbacks::{CallbackRegistry, OnAccept, OnMessage};
    pub use crate::cancel::CancelToken;
    pub use crate::error::{NetError, SocketKind};
    pub use crate::manager::NetManager;
    pub use crate::monitor::{EventMonitor, ManagerEvent};
    pub use crate::options::ManagerOptions;
    pub use crate::table::{DescriptorTable, Interest, Readiness, WatchedDescriptor};
}
