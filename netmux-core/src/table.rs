//! Descriptor table: the watched sockets handed to every readiness poll.
//!
//! The table keeps two parallel slot arrays of equal length (the capacity):
//! the `pollfd` records passed to the kernel and the owned sockets they
//! describe. Only the first `len()` slots are live.
//!
//! Mutation goes through [`DescriptorTable::append`] and
//! [`DescriptorTable::remove_at`]:
//!
//! - `append` grows capacity by a fixed step only when every slot is taken.
//! - `remove_at` moves the last live entry into the vacated slot (O(1),
//!   order not preserved) and hands the removed socket back to the caller.
//!   Dropping it closes the descriptor.

use std::fmt;
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{NetError, Result};

const EMPTY_SLOT: libc::pollfd = libc::pollfd {
    fd: -1,
    events: 0,
    revents: 0,
};

/// Readiness the poll should watch a descriptor for.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(libc::c_short);

impl Interest {
    /// Data (or a pending connection, or EOF) is available to read.
    pub const READ: Self = Self(libc::POLLIN);

    fn bits(self) -> libc::c_short {
        self.0
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::READ {
            f.write_str("READ")
        } else {
            write!(f, "Interest({:#x})", self.0)
        }
    }
}

/// What the last poll reported for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(libc::c_short);

impl Readiness {
    /// True when a read would not block: data, a pending connection, EOF,
    /// or a socket error waiting to be collected.
    #[inline]
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
    }

    /// True when the kernel no longer recognises the descriptor.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 & libc::POLLNVAL != 0
    }

    /// True when nothing was reported.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A live table entry as seen from outside the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchedDescriptor {
    /// Raw descriptor value
    pub fd: RawFd,
    /// Readiness being watched for
    pub interest: Interest,
}

/// Owned, growable collection of watched sockets.
pub struct DescriptorTable<S> {
    pollfds: Vec<libc::pollfd>,
    sockets: Vec<Option<S>>,
    count: usize,
    growth: usize,
}

impl<S: AsRawFd> DescriptorTable<S> {
    /// Create a table with `initial_capacity` empty slots that grows by
    /// `growth` slots when full.
    pub fn new(initial_capacity: usize, growth: usize) -> Self {
        let mut sockets = Vec::with_capacity(initial_capacity);
        sockets.resize_with(initial_capacity, || None);

        Self {
            pollfds: vec![EMPTY_SLOT; initial_capacity],
            sockets,
            count: 0,
            growth: growth.max(1),
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no entry is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of allocated slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pollfds.len()
    }

    /// Slots added per growth step.
    #[inline]
    pub fn growth(&self) -> usize {
        self.growth
    }

    /// Add `socket` at the end of the table, growing it first if full.
    ///
    /// Returns the index of the new entry. On allocation failure the table
    /// is left unchanged and `socket` is dropped.
    pub fn append(&mut self, socket: S, interest: Interest) -> Result<usize> {
        if self.count == self.capacity() {
            self.grow()?;
        }

        let index = self.count;
        self.pollfds[index] = libc::pollfd {
            fd: socket.as_raw_fd(),
            events: interest.bits(),
            revents: 0,
        };
        self.sockets[index] = Some(socket);
        self.count += 1;

        Ok(index)
    }

    /// Remove the entry at `index` by moving the last live entry into its
    /// slot. Returns the removed socket, or `None` if `index` is not live.
    ///
    /// The moved entry keeps the readiness reported by the last poll, so a
    /// caller walking the table can examine `index` again.
    pub fn remove_at(&mut self, index: usize) -> Option<S> {
        if index >= self.count {
            return None;
        }

        let last = self.count - 1;
        let removed = self.sockets[index].take();

        if index != last {
            self.pollfds[index] = self.pollfds[last];
            self.sockets[index] = self.sockets[last].take();
        }
        self.pollfds[last] = EMPTY_SLOT;
        self.count = last;

        removed
    }

    /// Raw descriptor at `index`.
    pub fn fd(&self, index: usize) -> Option<RawFd> {
        (index < self.count).then(|| self.pollfds[index].fd)
    }

    /// Socket at `index`.
    pub fn get(&self, index: usize) -> Option<&S> {
        if index < self.count {
            self.sockets[index].as_ref()
        } else {
            None
        }
    }

    /// Readiness the last poll reported for `index`.
    pub fn readiness(&self, index: usize) -> Readiness {
        if index < self.count {
            Readiness(self.pollfds[index].revents)
        } else {
            Readiness::default()
        }
    }

    /// Position of the live entry holding `fd`.
    pub fn position(&self, fd: RawFd) -> Option<usize> {
        self.pollfds[..self.count].iter().position(|p| p.fd == fd)
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = WatchedDescriptor> + '_ {
        self.pollfds[..self.count].iter().map(|p| WatchedDescriptor {
            fd: p.fd,
            interest: Interest(p.events),
        })
    }

    /// Exchange two live entries.
    pub(crate) fn swap(&mut self, a: usize, b: usize) {
        debug_assert!(a < self.count && b < self.count);
        self.pollfds.swap(a, b);
        self.sockets.swap(a, b);
    }

    /// The live `pollfd` records, for the readiness poll.
    pub(crate) fn pollfds_mut(&mut self) -> &mut [libc::pollfd] {
        &mut self.pollfds[..self.count]
    }

    /// Drop every live socket, closing all descriptors. Capacity is kept.
    ///
    /// Returns how many entries were closed.
    pub fn clear(&mut self) -> usize {
        let closed = self.count;
        while self.count > 0 {
            drop(self.remove_at(self.count - 1));
        }
        closed
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity();
        let step = self.growth;

        self.pollfds
            .try_reserve_exact(step)
            .and_then(|()| self.sockets.try_reserve_exact(step))
            .map_err(|source| NetError::AllocationFailed { capacity, source })?;

        self.pollfds.resize(capacity + step, EMPTY_SLOT);
        self.sockets.resize_with(capacity + step, || None);
        Ok(())
    }
}

impl<S> fmt::Debug for DescriptorTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fds: Vec<RawFd> = self.pollfds[..self.count].iter().map(|p| p.fd).collect();
        f.debug_struct("DescriptorTable")
            .field("count", &self.count)
            .field("capacity", &self.pollfds.len())
            .field("fds", &fds)
            .finish()
    }
}
