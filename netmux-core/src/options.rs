//! Connection manager configuration options
//!
//! Every knob has the value the manager was tuned with; callers override
//! individual settings with the `with_*` builders.

use std::time::Duration;

/// Connection manager options.
///
/// # Examples
///
/// ```
/// use netmux_core::options::ManagerOptions;
/// use std::time::Duration;
///
/// let opts = ManagerOptions::default()
///     .with_poll_timeout(Duration::from_millis(10))
///     .with_read_buffer_size(4096);
/// assert_eq!(opts.listen_backlog, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Upper bound on how long one `process()` call waits for readiness.
    /// - Default: 50ms
    pub poll_timeout: Duration,

    /// Bytes read from a ready client per cycle; also the largest payload
    /// handed to the message callback in one invocation.
    /// - Default: 1024
    pub read_buffer_size: usize,

    /// Pending-connection backlog of each stream listener.
    /// - Default: 5
    pub listen_backlog: i32,

    /// SO_SNDBUF / SO_RCVBUF applied to every datagram socket.
    /// - Default: 128000 bytes
    pub udp_buffer_size: usize,

    /// Descriptor slots allocated up front.
    /// - Default: 10
    pub initial_capacity: usize,

    /// Slots added each time the descriptor table is full.
    /// - Default: 10
    pub table_growth: usize,

    /// Set SO_REUSEADDR on stream listeners (Unix only).
    /// - Default: true
    pub reuse_address: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            read_buffer_size: 1024,
            listen_backlog: 5,
            udp_buffer_size: 128_000,
            initial_capacity: 10,
            table_growth: 10,
            reuse_address: true,
        }
    }
}

impl ManagerOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the per-read buffer size. Zero is raised to one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the listen backlog.
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Set the datagram socket send/receive buffer size.
    pub fn with_udp_buffer_size(mut self, size: usize) -> Self {
        self.udp_buffer_size = size;
        self
    }

    /// Set the number of descriptor slots allocated up front.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the table growth step. Zero is raised to one slot.
    pub fn with_table_growth(mut self, growth: usize) -> Self {
        self.table_growth = growth.max(1);
        self
    }

    /// Enable or disable SO_REUSEADDR on stream listeners.
    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }
}
