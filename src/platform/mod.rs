//! Platform console backends
//!
//! [`PlatformHandle`] is the capability surface every backend provides:
//! non-blocking read, write, mode get/set, dimensions, a bounded wait step
//! and the OS notification hook point. Cooked/raw translation happens only
//! inside each backend's `set_mode`.

#[cfg(unix)]
mod unix;
mod virtual_console;
#[cfg(windows)]
mod windows;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
pub use unix::UnixConsole;
pub use virtual_console::{VirtualConsole, VirtualStats};
#[cfg(windows)]
pub use windows::WindowsConsole;

use crate::config::NotificationKinds;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::Dimensions;
use crate::mode::ConsoleMode;
use crate::signal::{NotificationSink, WakeSignal};

/// Result of a non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were placed at the start of the buffer (`n >= 1`)
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// End of input
    Closed,
}

/// Why the wait step returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Readable,
    Woken,
    TimedOut,
}

/// OS console primitives behind a uniform interface
pub trait PlatformHandle: Send + fmt::Debug {
    /// Read whatever is available without blocking
    fn read(&mut self, buf: &mut [u8]) -> ConsoleResult<ReadOutcome>;

    /// Write some prefix of `buf`, returning how much was written
    fn write(&mut self, buf: &[u8]) -> ConsoleResult<usize>;

    /// Read the live mode
    fn get_mode(&self) -> ConsoleResult<ConsoleMode>;

    /// Switch the live mode
    ///
    /// Fails with [`ConsoleError::UnsupportedMode`] when the OS rejects the
    /// combination, in which case the previous mode is still in effect.
    fn set_mode(&mut self, mode: &ConsoleMode) -> ConsoleResult<()>;

    fn query_dimensions(&self) -> ConsoleResult<Dimensions>;

    /// Block until input is ready, `wake` fires, or `timeout` elapses
    fn wait(&mut self, wake: &WakeSignal, timeout: Duration) -> ConsoleResult<WaitOutcome>;

    /// Hook OS notifications so that they arrive through `sink`
    fn register_notifications(
        &mut self,
        sink: &NotificationSink,
        kinds: NotificationKinds,
    ) -> ConsoleResult<()>;

    /// Undo [`register_notifications`](Self::register_notifications)
    fn unregister_notifications(&mut self);
}

/// Open the console of the current process with the native backend
pub fn open_console() -> ConsoleResult<Box<dyn PlatformHandle>> {
    #[cfg(unix)]
    {
        Ok(Box::new(UnixConsole::open()?))
    }
    #[cfg(windows)]
    {
        Ok(Box::new(WindowsConsole::open()?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        Err(ConsoleError::UnavailableConsole(
            "no console backend for this platform".to_string(),
        ))
    }
}

static CONSOLE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive hold on the process console, released on drop
#[derive(Debug)]
pub(crate) struct ConsoleClaim {
    _private: (),
}

impl ConsoleClaim {
    pub(crate) fn acquire() -> ConsoleResult<Self> {
        CONSOLE_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ConsoleError::AlreadyOpen)?;
        Ok(Self { _private: () })
    }
}

impl Drop for ConsoleClaim {
    fn drop(&mut self) {
        CONSOLE_CLAIMED.store(false, Ordering::SeqCst);
    }
}
