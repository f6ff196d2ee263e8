//! Race-free reaction to OS signals.
//!
//! Two cooperating pieces live here:
//!
//! - [`SignalWakeupFd`] owns a self-pipe and registers its write end as the
//!   process-wide wakeup descriptor. Every signal dispatched through this
//!   module writes a byte to it, so an event loop blocked in `poll` wakes up.
//! - [`SignalHandler`] installs one dispatch function for a set of signals,
//!   records the previous disposition of each, and restores them exactly on
//!   [`SignalHandler::reset`] or drop.
//!
//! The dispatch function runs in signal context. It only touches atomics and
//! issues `write` calls, and it preserves `errno` for the interrupted code.

mod handler;
mod wakeup;

use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicUsize, Ordering};

use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::Signal;

use crate::error::ControlError;

pub use handler::{SignalHandler, SignalHandlerBuilder};
pub use wakeup::SignalWakeupFd;

pub(crate) const SIGNALS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

/// One slot per signal number; covers every number a [`Signal`] can hold.
const SLOT_COUNT: usize = 65;

/// Registration state consulted by [`dispatch`] for each signal number.
static SLOTS: [AtomicPtr<Shared>; SLOT_COUNT] =
    [const { AtomicPtr::new(ptr::null_mut()) }; SLOT_COUNT];

/// Process-wide wakeup descriptor, or -1 when none is registered.
static WAKEUP_FD: AtomicI32 = AtomicI32::new(-1);

/// Number of dispatch invocations currently executing.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

type Callback = Box<dyn Fn(Signal) + Send + Sync>;

/// State shared between a registration and the dispatch function.
struct Shared {
    called: AtomicBool,
    wakeup_fd: RawFd,
    callback: Option<Callback>,
}

impl Shared {
    fn fire(&self, signum: c_int) {
        self.called.store(true, Ordering::SeqCst);
        if self.wakeup_fd >= 0 {
            write_wakeup_byte(self.wakeup_fd);
        }
        if let (Some(callback), Ok(signal)) = (&self.callback, Signal::try_from(signum)) {
            callback(signal);
        }
    }
}

extern "C" fn dispatch(signum: c_int) {
    let saved_errno = Errno::last_raw();
    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    if let Some(slot) = usize::try_from(signum).ok().and_then(|index| SLOTS.get(index)) {
        let shared = slot.load(Ordering::SeqCst);
        // SAFETY: a non-null slot pointer comes from `Arc::into_raw` and is
        // only released after it has been unpublished and IN_FLIGHT drained.
        if let Some(shared) = unsafe { shared.as_ref() } {
            shared.fire(signum);
        }
    }
    let wakeup = WAKEUP_FD.load(Ordering::SeqCst);
    if wakeup >= 0 {
        write_wakeup_byte(wakeup);
    }
    IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    Errno::set_raw(saved_errno);
}

fn write_wakeup_byte(fd: RawFd) {
    let byte = [0_u8];
    // SAFETY: writes one byte from a live stack buffer. A full pipe (EAGAIN)
    // already guarantees a pending wakeup, so the result is ignored.
    unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
}

/// Waits until no dispatch invocation can still observe state that was just
/// unpublished.
fn quiesce() {
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        std::hint::spin_loop();
    }
}

fn slot_index(signal: Signal) -> Option<usize> {
    usize::try_from(signal as c_int).ok()
}

fn slot_for(signal: Signal) -> Option<&'static AtomicPtr<Shared>> {
    slot_index(signal).and_then(|index| SLOTS.get(index))
}

/// Runs `body` with a [`SignalHandler`] installed for `signals`.
///
/// Previous dispositions are restored when `body` returns or unwinds.
///
/// # Errors
///
/// Returns [`ControlError::Os`] when a handler cannot be installed; no
/// disposition is changed in that case.
pub fn with_signal_handlers<T>(
    signals: &[Signal],
    body: impl FnOnce(&SignalHandler<'_>) -> T,
) -> Result<T, ControlError> {
    let handler = SignalHandler::builder(signals).install()?;
    Ok(body(&handler))
}
