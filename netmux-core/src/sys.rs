//! Thin wrapper over the `poll(2)` system call.
//!
//! # Safety
//!
//! The only unsafe operation is handing the kernel a pointer/length pair
//! that comes straight from a live `&mut [pollfd]`.

#![allow(unsafe_code)]

use std::io;
use std::time::Duration;

/// Wait up to `timeout` for any entry in `fds` to become ready.
///
/// Returns the number of entries with non-zero `revents`. A signal
/// interrupting the wait counts as a cycle with nothing ready.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(rc as usize)
}
