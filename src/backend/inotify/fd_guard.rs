use std::{
    io,
    ops::Deref,
    os::unix::io::{
        AsRawFd,
        RawFd,
    },
};

use inotify_sys as ffi;


/// A RAII guard around the inotify file descriptor
///
/// Closing the descriptor also removes every watch that was added to it, so
/// dropping the guard releases all kernel resources of one watch session.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FdGuard {
    fd: RawFd,
}

impl FdGuard {
    /// Create a new inotify instance
    pub(crate) fn init() -> io::Result<Self> {
        let fd = unsafe {
            // `IN_NONBLOCK` is needed, because the descriptor is registered
            // with `mio` and drained until the kernel reports `EAGAIN`.
            // Blocking happens in `Poll::poll`, where the cancellation waker
            // is waited on at the same time.
            //
            // `IN_CLOEXEC` keeps the descriptor from leaking into processes
            // spawned by the host.
            ffi::inotify_init1(ffi::IN_CLOEXEC | ffi::IN_NONBLOCK)
        };

        match fd {
            -1 => Err(io::Error::last_os_error()),
            _  => Ok(FdGuard { fd }),
        }
    }
}

impl Deref for FdGuard {
    type Target = RawFd;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.fd
    }
}

impl AsRawFd for FdGuard {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
