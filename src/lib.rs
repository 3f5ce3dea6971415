//! Mochi Console Library
//!
//! Scoped access to the process console for interactive programs. This crate
//! provides:
//!
//! - `session`: [`ConsoleSession`], the one object applications hold
//! - `mode`: portable console modes with an opaque platform extension
//! - `signal`: the lock-free bridge from OS notifications to ordinary code
//! - `reader`: the merged, cancelable stream of input bytes and notifications
//! - `platform`: POSIX, Windows and in-memory console backends
//!
//! Opening a session captures the console's mode; dropping it puts that mode
//! back and unhooks every signal handler it installed.

pub mod config;
pub mod error;
pub mod event;
pub mod mode;
pub mod mode_controller;
pub mod platform;
pub mod reader;
pub mod session;
pub mod signal;

pub use config::{NotificationKinds, SessionConfig};
pub use error::{ConsoleError, ConsoleResult};
pub use event::{Dimensions, InputEvent, Notification};
pub use mode::{ConsoleMode, PlatformBits};
pub use mode_controller::ModeController;
pub use platform::{open_console, PlatformHandle, ReadOutcome, VirtualConsole, WaitOutcome};
pub use reader::{Canceller, EventReader, Events};
pub use session::{ConsoleSession, SessionState};
pub use signal::{
    NotificationSink, PushOutcome, SignalBridge, WakeSignal, RESERVED_CONTROL_SLOTS, RING_CAPACITY,
};
