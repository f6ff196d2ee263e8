//! Raw descriptor plumbing used by the command runner and the daemon
//! supervisor.
//!
//! Everything here that the daemon protocol calls between `fork` and `exec`
//! is restricted to plain system calls: no allocation, no locking, and no
//! logging.

use std::ffi::CStr;
use std::fmt;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::c_short;
use nix::errno::Errno;

use crate::error::ControlError;
use crate::retry::{RetryError, Retryable, Schedule, retry_with};
use crate::timeout::MonotonicClock;

/// Descriptors at or above this value are never inspected when the limit
/// on open files is unknown.
const FALLBACK_MAX_FD: RawFd = 1024;

/// Creates a pipe with both ends marked close-on-exec.
#[cfg(target_os = "linux")]
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` provides room for exactly the two descriptors pipe2 writes.
    Errno::result(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    let [read_end, write_end] = fds;
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us.
    Ok(unsafe { (OwnedFd::from_raw_fd(read_end), OwnedFd::from_raw_fd(write_end)) })
}

/// Creates a pipe with both ends marked close-on-exec.
#[cfg(not(target_os = "linux"))]
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` provides room for exactly the two descriptors pipe writes.
    Errno::result(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    let [read_end, write_end] = fds;
    // SAFETY: pipe succeeded, so both descriptors are open and owned by us.
    let pair = unsafe { (OwnedFd::from_raw_fd(read_end), OwnedFd::from_raw_fd(write_end)) };
    set_cloexec(pair.0.as_raw_fd(), true)?;
    set_cloexec(pair.1.as_raw_fd(), true)?;
    Ok(pair)
}

/// Opens `path` with plain system calls only; safe between `fork` and `exec`.
pub(crate) fn open_raw(path: &CStr, flags: libc::c_int, mode: libc::mode_t) -> Result<RawFd, Errno> {
    loop {
        // SAFETY: `path` is NUL-terminated; `mode` is only read with O_CREAT.
        match Errno::result(unsafe { libc::open(path.as_ptr(), flags, libc::c_uint::from(mode)) }) {
            Ok(fd) => return Ok(fd),
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(errno),
        }
    }
}

/// Closes `fd`, ignoring errors.
pub(crate) fn close_raw(fd: RawFd) {
    // SAFETY: the caller owns `fd` and does not use it afterwards.
    unsafe { libc::close(fd) };
}

/// Terminates a forked child without running exit handlers or flushing
/// buffers shared with the parent.
pub(crate) fn exit_child(status: libc::c_int) -> ! {
    // SAFETY: `_exit` is async-signal-safe and touches no process state
    // inherited from the parent.
    unsafe { libc::_exit(status) }
}

/// Sets or clears the close-on-exec flag of `fd`.
pub(crate) fn set_cloexec(fd: RawFd, enable: bool) -> Result<(), Errno> {
    // SAFETY: F_GETFD only reads descriptor flags.
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    let updated = if enable {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if updated != flags {
        // SAFETY: F_SETFD only updates descriptor flags.
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFD, updated) })?;
    }
    Ok(())
}

/// Switches `fd` to non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> Result<(), Errno> {
    // SAFETY: F_GETFL only reads file status flags.
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: F_SETFL only updates file status flags.
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

/// Duplicates `from` onto `to`, retrying on interruption.
pub(crate) fn dup2(from: RawFd, to: RawFd) -> Result<(), Errno> {
    loop {
        // SAFETY: dup2 validates both descriptors itself.
        match Errno::result(unsafe { libc::dup2(from, to) }) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(errno),
        }
    }
}

/// Reads into `buf`, retrying on interruption. Returns 0 at end of stream.
pub(crate) fn read_retrying(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    loop {
        // SAFETY: the pointer and length describe the writable slice `buf`.
        let result = Errno::result(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) });
        match result {
            Ok(count) => return Ok(count.unsigned_abs()),
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(errno),
        }
    }
}

/// Writes all of `bytes`, retrying on interruption and short writes.
pub(crate) fn write_all_retrying(fd: RawFd, mut bytes: &[u8]) -> Result<(), Errno> {
    while !bytes.is_empty() {
        // SAFETY: the pointer and length describe the readable slice `bytes`.
        let result = Errno::result(unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) });
        match result {
            Ok(0) => return Err(Errno::EPIPE),
            Ok(count) => bytes = bytes.get(count.unsigned_abs()..).unwrap_or_default(),
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(errno),
        }
    }
    Ok(())
}

/// Reads until end of stream or until `limit` bytes were collected.
pub(crate) fn read_to_limit(fd: RawFd, limit: usize) -> Result<Vec<u8>, Errno> {
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 4096];
    while collected.len() < limit {
        let want = chunk.len().min(limit - collected.len());
        let Some(window) = chunk.get_mut(..want) else {
            break;
        };
        let count = read_retrying(fd, window)?;
        if count == 0 {
            break;
        }
        collected.extend_from_slice(window.get(..count).unwrap_or_default());
    }
    Ok(collected)
}

/// Upper bound for descriptor numbers in this process.
fn max_fd() -> RawFd {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the provided struct only.
    let result = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &raw mut limit) };
    if result == 0 && limit.rlim_max != libc::RLIM_INFINITY {
        return RawFd::try_from(limit.rlim_max).unwrap_or(RawFd::MAX);
    }
    // SAFETY: sysconf has no preconditions.
    let open_max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if open_max > 0 {
        RawFd::try_from(open_max).unwrap_or(FALLBACK_MAX_FD)
    } else {
        FALLBACK_MAX_FD
    }
}

/// Closes every descriptor numbered 3 or above except those in `keep`.
///
/// Errors from individual `close` calls are ignored; the descriptor is either
/// closed afterwards or was never open. Safe to call between `fork` and
/// `exec`.
pub fn close_fds(keep: &[RawFd]) {
    let upper = max_fd();
    let mut first = 3;
    while first < upper {
        let next_kept = keep
            .iter()
            .copied()
            .filter(|fd| *fd >= first)
            .min()
            .unwrap_or(upper);
        if next_kept > first {
            close_range(first, next_kept.min(upper) - 1);
        }
        first = next_kept.saturating_add(1);
    }
}

#[cfg(target_os = "linux")]
fn close_range(first: RawFd, last: RawFd) {
    let (Ok(low), Ok(high)) = (libc::c_uint::try_from(first), libc::c_uint::try_from(last))
    else {
        return;
    };
    // SAFETY: close_range only closes descriptors in the given range.
    let result = unsafe { libc::syscall(libc::SYS_close_range, low, high, 0) };
    if result != 0 {
        close_each(first, last);
    }
}

#[cfg(not(target_os = "linux"))]
fn close_range(first: RawFd, last: RawFd) {
    close_each(first, last);
}

fn close_each(first: RawFd, last: RawFd) {
    for fd in first..=last {
        // SAFETY: closing an unknown descriptor is harmless; EBADF is ignored.
        unsafe { libc::close(fd) };
    }
}

/// Waits until `fd` reports any of the `events` poll flags (for example
/// [`libc::POLLIN`]).
///
/// Interrupted waits resume with whatever time is left. Returns the reported
/// events, or `None` if `timeout` elapsed first. `None` as the timeout waits
/// indefinitely.
///
/// # Errors
///
/// Returns [`ControlError::Os`] when `poll` fails for a reason other than an
/// interruption.
pub fn wait_for_fd_condition(
    fd: BorrowedFd<'_>,
    events: c_short,
    timeout: Option<Duration>,
) -> Result<Option<c_short>, ControlError> {
    let Some(total) = timeout else {
        loop {
            match poll_once(fd.as_raw_fd(), events, -1) {
                Ok(ready) => return Ok(ready),
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(ControlError::os("poll", errno)),
            }
        }
    };

    // The attempt blocks in poll itself, so the retry loop only recomputes the
    // remaining time instead of sleeping between attempts.
    let started = std::time::Instant::now();
    let outcome = retry_with(
        || {
            let left = total.saturating_sub(started.elapsed());
            match poll_once(fd.as_raw_fd(), events, poll_timeout_ms(left)) {
                Ok(ready) => Ok(ready),
                Err(Errno::EINTR) => Err(Retryable::Again(None)),
                Err(errno) => Err(Retryable::Abort(ControlError::os("poll", errno))),
            }
        },
        Schedule::RemainingTime,
        total,
        &MonotonicClock,
        |_| {},
    );
    match outcome {
        Ok(ready) => Ok(ready),
        Err(RetryError::Timeout { .. }) => Ok(None),
        Err(RetryError::Aborted(error)) => Err(error),
    }
}

/// Converts a wait into the millisecond argument of `poll`, rounding up so a
/// sub-millisecond remainder still waits.
pub(crate) fn poll_timeout_ms(wait: Duration) -> libc::c_int {
    let millis = wait.as_millis();
    let rounded = if wait.subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis.saturating_add(1)
    };
    libc::c_int::try_from(rounded).unwrap_or(libc::c_int::MAX)
}

fn poll_once(fd: RawFd, events: c_short, timeout_ms: libc::c_int) -> Result<Option<c_short>, Errno> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: a single valid pollfd entry is passed with nfds = 1.
    let ready = Errno::result(unsafe { libc::poll(&raw mut pfd, 1, timeout_ms) })?;
    Ok((ready > 0).then_some(pfd.revents))
}

/// Fixed-capacity text buffer for composing messages without allocating.
///
/// Writes beyond the capacity are truncated.
pub(crate) struct FrameBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FrameBuf<N> {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.buf.get(..self.len).unwrap_or_default()
    }
}

impl<const N: usize> fmt::Write for FrameBuf<N> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        let free = N - self.len;
        let take = text.len().min(free);
        if let (Some(target), Some(source)) = (
            self.buf.get_mut(self.len..self.len + take),
            text.as_bytes().get(..take),
        ) {
            target.copy_from_slice(source);
            self.len += take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
