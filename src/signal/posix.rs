//! POSIX signal hooks
//!
//! Installs `sigaction` handlers for SIGWINCH, SIGINT and SIGHUP that push
//! into the active bridge. Everything reachable from `on_signal` is
//! async-signal-safe: atomics, `ioctl(TIOCGWINSZ)`, the lock-free ring and
//! one `write(2)` on the wake pipe. Nothing is logged from handler context.
//!
//! Only one set of hooks can be live per process; the handler finds the
//! bridge through a process-wide pointer.

use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::config::NotificationKinds;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::{Dimensions, Notification};

use super::{BridgeShared, NotificationSink};

static ACTIVE_BRIDGE: AtomicPtr<BridgeShared> = AtomicPtr::new(ptr::null_mut());
static HANDLERS_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
static CONSOLE_FD: AtomicI32 = AtomicI32::new(-1);

/// Live signal dispositions; dropping restores the previous ones
pub(crate) struct PosixHooks {
    previous: Vec<(Signal, SigAction)>,
    bridge: *const BridgeShared,
}

impl std::fmt::Debug for PosixHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signals: Vec<Signal> = self.previous.iter().map(|(s, _)| *s).collect();
        f.debug_struct("PosixHooks").field("signals", &signals).finish()
    }
}

// The raw pointer is an owned Arc reference released in Drop.
unsafe impl Send for PosixHooks {}

/// Install handlers for the selected notification kinds
///
/// `console_fd` is queried for the new size when SIGWINCH arrives.
pub(crate) fn install(
    sink: &NotificationSink,
    console_fd: RawFd,
    kinds: NotificationKinds,
) -> ConsoleResult<PosixHooks> {
    let raw = Arc::into_raw(Arc::clone(sink.shared())).cast_mut();
    if ACTIVE_BRIDGE
        .compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        // SAFETY: raw came from Arc::into_raw just above and was never published
        drop(unsafe { Arc::from_raw(raw) });
        return Err(ConsoleError::AlreadyOpen);
    }
    CONSOLE_FD.store(console_fd, Ordering::SeqCst);

    let mut hooks = PosixHooks {
        previous: Vec::new(),
        bridge: raw,
    };
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in selected_signals(kinds) {
        // SAFETY: on_signal only performs async-signal-safe operations
        let previous = unsafe { sigaction(signal, &action) }?;
        hooks.previous.push((signal, previous));
        tracing::debug!(?signal, "Installed console signal handler");
    }
    Ok(hooks)
}

impl Drop for PosixHooks {
    fn drop(&mut self) {
        for (signal, previous) in self.previous.drain(..).rev() {
            // SAFETY: reinstating the disposition sigaction returned earlier
            if let Err(e) = unsafe { sigaction(signal, &previous) } {
                tracing::warn!(?signal, "Failed to restore signal disposition: {}", e);
            }
        }

        let _ = ACTIVE_BRIDGE.compare_exchange(
            self.bridge.cast_mut(),
            ptr::null_mut(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        CONSOLE_FD.store(-1, Ordering::SeqCst);

        // A handler that loaded the pointer before it was cleared may still
        // be using it on another thread.
        while HANDLERS_IN_FLIGHT.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }

        // SAFETY: matches the Arc::into_raw in install(); no handler can
        // observe the pointer any more
        drop(unsafe { Arc::from_raw(self.bridge) });
    }
}

fn selected_signals(kinds: NotificationKinds) -> Vec<Signal> {
    let mut signals = Vec::with_capacity(3);
    if kinds.resize {
        signals.push(Signal::SIGWINCH);
    }
    if kinds.interrupt {
        signals.push(Signal::SIGINT);
    }
    if kinds.hangup {
        signals.push(Signal::SIGHUP);
    }
    signals
}

extern "C" fn on_signal(signum: libc::c_int) {
    let _errno = ErrnoGuard::save();
    HANDLERS_IN_FLIGHT.fetch_add(1, Ordering::SeqCst);

    let bridge = ACTIVE_BRIDGE.load(Ordering::SeqCst);
    if !bridge.is_null() {
        // SAFETY: PosixHooks::drop waits for HANDLERS_IN_FLIGHT to drain
        // before releasing the bridge
        let bridge = unsafe { &*bridge };
        let notification = match signum {
            libc::SIGWINCH => {
                probe_dimensions(CONSOLE_FD.load(Ordering::SeqCst)).map(Notification::Resize)
            },
            libc::SIGINT => Some(Notification::Interrupt),
            libc::SIGHUP => Some(Notification::HangUp),
            _ => None,
        };
        if let Some(notification) = notification {
            bridge.push(notification);
        }
    }

    HANDLERS_IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
}

/// TIOCGWINSZ on the console, usable from handler context
pub(crate) fn probe_dimensions(fd: RawFd) -> Option<Dimensions> {
    if fd < 0 {
        return None;
    }
    // SAFETY: winsize is plain old data; ioctl only writes into it
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut ws) };
    (result == 0).then(|| Dimensions::from(ws))
}

/// Keeps `errno` intact across the handler
struct ErrnoGuard(i32);

impl ErrnoGuard {
    fn save() -> Self {
        Self(Errno::last_raw())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        Errno::set_raw(self.0);
    }
}
