use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::{debug, warn};

use super::{
    Callback, SIGNALS_TARGET, SLOT_COUNT, Shared, SignalWakeupFd, dispatch, quiesce, slot_for,
    slot_index,
};
use crate::error::ControlError;

/// Configures a [`SignalHandler`] before installation.
pub struct SignalHandlerBuilder<'a> {
    signals: Vec<Signal>,
    wakeup: Option<&'a SignalWakeupFd>,
    callback: Option<Callback>,
}

impl<'a> SignalHandlerBuilder<'a> {
    /// Notifies `wakeup` whenever one of the signals arrives.
    #[must_use]
    pub fn wakeup(mut self, wakeup: &'a SignalWakeupFd) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    /// Forwards each delivered signal to `callback`.
    ///
    /// The callback runs in signal context and must restrict itself to
    /// async-signal-safe work such as storing to atomics.
    #[must_use]
    pub fn callback(mut self, callback: impl Fn(Signal) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Installs the dispatch function for every configured signal.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Os`] if any disposition cannot be changed.
    /// Signals installed before the failure are rolled back first.
    pub fn install(self) -> Result<SignalHandler<'a>, ControlError> {
        let shared = Arc::new(Shared {
            called: AtomicBool::new(false),
            wakeup_fd: self.wakeup.map_or(-1, |wakeup| wakeup.write_fd().as_raw_fd()),
            callback: self.callback,
        });
        let mut handler = SignalHandler {
            shared,
            saved: Vec::with_capacity(self.signals.len()),
            _wakeup: PhantomData,
        };
        for signal in self.signals {
            if let Err(errno) = handler.install_one(signal) {
                handler.reset();
                return Err(ControlError::os("sigaction", errno));
            }
        }
        debug!(
            target: SIGNALS_TARGET,
            signals = ?handler.signals(),
            "installed signal handler"
        );
        Ok(handler)
    }
}

/// One registration stacked on a signal.
struct Link {
    owner: *const Shared,
    /// Disposition this registration replaced. When a registration below is
    /// removed first, the one above inherits its value.
    action: SigAction,
}

// SAFETY: `owner` is only compared and republished under the chain lock; it is
// never dereferenced outside `dispatch`.
unsafe impl Send for Link {}

/// Registrations per signal number, oldest first. The top entry is the one
/// published in the dispatch slot.
static CHAINS: Mutex<[Vec<Link>; SLOT_COUNT]> = Mutex::new([const { Vec::new() }; SLOT_COUNT]);

fn chains() -> MutexGuard<'static, [Vec<Link>; SLOT_COUNT]> {
    CHAINS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signal taken over by a handler, with the reference published for it.
struct Saved {
    signal: Signal,
    ours: *const Shared,
}

/// Handler registration for a set of signals.
///
/// While installed, delivery of any of the signals sets [`called`], notifies
/// the optional wakeup descriptor and invokes the optional callback. The
/// previous disposition of every signal is restored by [`reset`] or on drop.
///
/// [`called`]: Self::called
/// [`reset`]: Self::reset
pub struct SignalHandler<'a> {
    shared: Arc<Shared>,
    saved: Vec<Saved>,
    _wakeup: PhantomData<&'a SignalWakeupFd>,
}

impl<'a> SignalHandler<'a> {
    /// Starts configuring a handler for `signals`. Duplicates are ignored.
    #[must_use]
    pub fn builder(signals: &[Signal]) -> SignalHandlerBuilder<'a> {
        let mut unique = Vec::with_capacity(signals.len());
        for signal in signals {
            if !unique.contains(signal) {
                unique.push(*signal);
            }
        }
        SignalHandlerBuilder {
            signals: unique,
            wakeup: None,
            callback: None,
        }
    }

    /// Returns `true` once any of the signals was delivered since
    /// installation or the last [`clear`](Self::clear).
    #[must_use]
    pub fn called(&self) -> bool {
        self.shared.called.load(Ordering::SeqCst)
    }

    /// Forgets earlier deliveries without touching installed dispositions.
    pub fn clear(&self) {
        self.shared.called.store(false, Ordering::SeqCst);
    }

    /// Signals whose dispositions are currently taken over.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal> {
        self.saved.iter().map(|saved| saved.signal).collect()
    }

    /// Restores the previous disposition of every signal.
    ///
    /// Each signal is restored at most once; later calls are no-ops. Handlers
    /// may be reset in any order: a handler that is no longer the newest for
    /// a signal only removes itself, and the newer one restores the original
    /// disposition later.
    pub fn reset(&mut self) {
        while let Some(saved) = self.saved.pop() {
            unlink(saved.signal, saved.ours);
            release(saved.ours);
        }
    }

    fn install_one(&mut self, signal: Signal) -> Result<(), Errno> {
        let (slot, index) = slot_for(signal).zip(slot_index(signal)).ok_or(Errno::EINVAL)?;
        let mut chains = chains();
        let chain = chains.get_mut(index).ok_or(Errno::EINVAL)?;
        let ours = Arc::into_raw(Arc::clone(&self.shared));
        let previous_slot = slot.swap(ours.cast_mut(), Ordering::SeqCst);
        let action = SigAction::new(
            SigHandler::Handler(dispatch),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: `dispatch` is async-signal-safe; it only touches atomics,
        // issues write(2), and restores errno.
        match unsafe { sigaction(signal, &action) } {
            Ok(previous) => {
                chain.push(Link {
                    owner: ours,
                    action: previous,
                });
                self.saved.push(Saved { signal, ours });
                Ok(())
            }
            Err(errno) => {
                slot.store(previous_slot, Ordering::SeqCst);
                drop(chains);
                release(ours);
                Err(errno)
            }
        }
    }
}

/// Removes `ours` from the registrations of `signal`.
///
/// Only the newest registration touches the kernel disposition and the
/// dispatch slot. Afterwards nothing published refers to `ours`.
fn unlink(signal: Signal, ours: *const Shared) {
    let Some((slot, index)) = slot_for(signal).zip(slot_index(signal)) else {
        return;
    };
    let mut chains = chains();
    let Some(chain) = chains.get_mut(index) else {
        return;
    };
    let Some(position) = chain.iter().position(|link| ptr::eq(link.owner, ours)) else {
        return;
    };
    let link = chain.remove(position);
    if let Some(newer) = chain.get_mut(position) {
        newer.action = link.action;
        return;
    }
    // SAFETY: reinstates a disposition previously returned by the kernel for
    // this very signal.
    if let Err(errno) = unsafe { sigaction(signal, &link.action) } {
        warn!(
            target: SIGNALS_TARGET,
            %signal,
            error = %errno,
            "failed to restore signal disposition"
        );
    }
    let older = position
        .checked_sub(1)
        .and_then(|below| chain.get(below))
        .map_or(ptr::null_mut(), |below| below.owner.cast_mut());
    slot.store(older, Ordering::SeqCst);
}

impl Drop for SignalHandler<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Drops the reference that was published to a slot.
fn release(ours: *const Shared) {
    quiesce();
    // SAFETY: `ours` came from `Arc::into_raw` and has been unlinked, so no
    // slot or registration refers to it; no dispatch invocation can still
    // hold it.
    drop(unsafe { Arc::from_raw(ours) });
}
