use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;

use super::{WAKEUP_FD, quiesce};
use crate::error::ControlError;
use crate::fd;

/// Live registration: its write end and the descriptor it displaced.
struct Registration {
    fd: RawFd,
    previous: RawFd,
}

/// Registered wakeup descriptors, oldest first. The top entry is the one
/// published in `WAKEUP_FD`.
static REGISTRATIONS: Mutex<Vec<Registration>> = Mutex::new(Vec::new());

fn registrations() -> MutexGuard<'static, Vec<Registration>> {
    REGISTRATIONS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Self-pipe registered as the process-wide signal wakeup descriptor.
///
/// Poll the read end (via [`AsFd`]) alongside other descriptors; it becomes
/// readable whenever a signal is dispatched or [`notify`](Self::notify) is
/// called. The previously registered descriptor is reinstated exactly once,
/// by [`reset`](Self::reset) or on drop. Pipes may be reset in any order; the
/// slot never keeps pointing at a pipe that has been reset.
#[derive(Debug)]
pub struct SignalWakeupFd {
    read_end: OwnedFd,
    write_end: OwnedFd,
    registered: bool,
}

impl SignalWakeupFd {
    /// Creates the pipe and registers its write end.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Os`] when the pipe cannot be created or
    /// configured.
    pub fn new() -> Result<Self, ControlError> {
        let (read_end, write_end) = fd::pipe().map_err(|errno| ControlError::os("pipe", errno))?;
        for end in [&read_end, &write_end] {
            fd::set_nonblocking(end.as_raw_fd())
                .map_err(|errno| ControlError::os("fcntl", errno))?;
        }
        let fd = write_end.as_raw_fd();
        let mut registrations = registrations();
        let previous = WAKEUP_FD.swap(fd, Ordering::SeqCst);
        registrations.push(Registration { fd, previous });
        Ok(Self {
            read_end,
            write_end,
            registered: true,
        })
    }

    /// Wakes up whoever polls the read end.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Os`] if the byte cannot be written. A full pipe
    /// already guarantees a pending wakeup and is not an error.
    pub fn notify(&self) -> Result<(), ControlError> {
        match fd::write_all_retrying(self.write_end.as_raw_fd(), b"\0") {
            Ok(()) | Err(Errno::EAGAIN) => Ok(()),
            Err(errno) => Err(ControlError::os("write", errno)),
        }
    }

    /// Consumes pending wakeup bytes and returns how many were read.
    pub fn drain(&self) -> usize {
        let mut total = 0;
        let mut buf = [0_u8; 64];
        while let Ok(count) = fd::read_retrying(self.read_end.as_raw_fd(), &mut buf) {
            if count == 0 {
                break;
            }
            total += count;
        }
        total
    }

    /// Returns `true` until [`reset`](Self::reset) has run.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    /// Withdraws this pipe's registration. Later calls do nothing.
    ///
    /// If this pipe is the current wakeup descriptor, the one it displaced is
    /// reinstated. Otherwise a newer pipe is current and inherits the
    /// displaced descriptor for its own reset.
    pub fn reset(&mut self) {
        if !std::mem::replace(&mut self.registered, false) {
            return;
        }
        let fd = self.write_end.as_raw_fd();
        let mut registrations = registrations();
        let Some(position) = registrations.iter().position(|entry| entry.fd == fd) else {
            return;
        };
        let ours = registrations.remove(position);
        if let Some(newer) = registrations.get_mut(position) {
            newer.previous = ours.previous;
        } else {
            WAKEUP_FD.store(ours.previous, Ordering::SeqCst);
        }
        drop(registrations);
        quiesce();
    }

    pub(super) fn write_fd(&self) -> BorrowedFd<'_> {
        self.write_end.as_fd()
    }
}

impl AsFd for SignalWakeupFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read_end.as_fd()
    }
}

impl Drop for SignalWakeupFd {
    fn drop(&mut self) {
        self.reset();
    }
}
