//! Signal bridge
//!
//! Turns asynchronous OS notifications (resize, interrupt, hang-up) into a
//! queue the event reader drains from ordinary context. Producers hold a
//! [`NotificationSink`]; the only consumer is [`SignalBridge::drain`].
//!
//! The OS side of installation is platform-specific and lives behind
//! [`PlatformHandle::register_notifications`]. On POSIX that is
//! `sigaction` (see `posix`); on Windows a console control handler plus the
//! window-buffer-size records that arrive with ordinary input.

#[cfg(unix)]
pub(crate) mod posix;
mod ring;
mod wake;

use std::sync::Arc;

pub use ring::{PushOutcome, RESERVED_CONTROL_SLOTS, RING_CAPACITY};
pub use wake::WakeSignal;

use crate::config::NotificationKinds;
use crate::error::ConsoleResult;
use crate::event::Notification;
use crate::platform::PlatformHandle;
use ring::NotificationRing;

/// State shared between producers and the bridge
#[derive(Debug)]
pub(crate) struct BridgeShared {
    ring: NotificationRing,
    wake: WakeSignal,
}

impl BridgeShared {
    /// Enqueue and wake the reader. Async-signal-safe.
    pub(crate) fn push(&self, notification: Notification) -> PushOutcome {
        let outcome = self.ring.push(notification);
        self.wake.notify();
        outcome
    }
}

/// Producer handle for the notification queue
///
/// Cheap to clone and safe to use from any thread. `push` never allocates or
/// blocks, which is what lets the OS hooks call it from signal context.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    shared: Arc<BridgeShared>,
}

impl NotificationSink {
    /// Enqueue a notification and wake the reader
    pub fn push(&self, notification: Notification) -> PushOutcome {
        self.shared.push(notification)
    }

    /// Wake the reader without queueing anything
    pub(crate) fn wake_reader(&self) {
        self.shared.wake.notify();
    }

    pub(crate) fn shared(&self) -> &Arc<BridgeShared> {
        &self.shared
    }
}

/// Owner of the notification queue and of the OS hook registration
#[derive(Debug)]
pub struct SignalBridge {
    shared: Arc<BridgeShared>,
    installed: bool,
}

impl SignalBridge {
    /// Allocate the ring and the wake primitive
    pub fn new() -> ConsoleResult<Self> {
        Ok(Self {
            shared: Arc::new(BridgeShared {
                ring: NotificationRing::new(),
                wake: WakeSignal::new()?,
            }),
            installed: false,
        })
    }

    /// A producer handle feeding this bridge
    pub fn sink(&self) -> NotificationSink {
        NotificationSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register with the OS. Installing twice is a no-op.
    pub fn install(
        &mut self,
        platform: &mut dyn PlatformHandle,
        kinds: NotificationKinds,
    ) -> ConsoleResult<()> {
        if self.installed {
            tracing::debug!("Signal bridge already installed");
            return Ok(());
        }
        platform.register_notifications(&self.sink(), kinds)?;
        self.installed = true;
        tracing::debug!(?kinds, "Signal bridge installed");
        Ok(())
    }

    /// Unregister from the OS. Uninstalling twice is a no-op.
    pub fn uninstall(&mut self, platform: &mut dyn PlatformHandle) {
        if !self.installed {
            return;
        }
        platform.unregister_notifications();
        self.installed = false;
        tracing::debug!("Signal bridge uninstalled");
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Take everything queued, in arrival order
    pub fn drain(&mut self) -> Vec<Notification> {
        self.shared.ring.drain()
    }

    /// Approximate number of queued notifications
    pub fn pending(&self) -> usize {
        self.shared.ring.len()
    }

    /// The primitive the reader waits on
    pub fn wake(&self) -> &WakeSignal {
        &self.shared.wake
    }
}
