//! Console session
//!
//! Ties the platform handle, mode controller, signal bridge and event reader
//! to one scoped object. Opening captures the console's mode and hooks
//! notifications; closing (explicitly or on drop) unhooks them and puts the
//! original mode back.

use std::io;

use crate::config::SessionConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::Dimensions;
use crate::mode::ConsoleMode;
use crate::mode_controller::ModeController;
use crate::platform::{self, PlatformHandle};
use crate::reader::{Canceller, EventReader, Events};
use crate::signal::{NotificationSink, SignalBridge};

/// Lifecycle of a [`ConsoleSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Closing,
    Closed,
}

/// Exclusive, scoped hold on a console
///
/// ```no_run
/// use mochi_console::{ConsoleMode, ConsoleSession, InputEvent};
///
/// let mut session = ConsoleSession::open(ConsoleMode::cbreak())?;
/// for event in session.events()? {
///     match event? {
///         InputEvent::Bytes(bytes) if bytes == b"q" => break,
///         other => println!("{:?}", other),
///     }
/// }
/// # Ok::<(), mochi_console::ConsoleError>(())
/// ```
#[derive(Debug)]
pub struct ConsoleSession {
    platform: Box<dyn PlatformHandle>,
    controller: ModeController,
    bridge: SignalBridge,
    reader: EventReader,
    config: SessionConfig,
    state: SessionState,
}

impl ConsoleSession {
    /// Open the process console in `requested` mode
    ///
    /// Configuration comes from the defaults plus `MOCHI_CONSOLE_*`
    /// environment overrides.
    pub fn open(requested: ConsoleMode) -> ConsoleResult<Self> {
        let mut config = SessionConfig::default();
        config.apply_env_overrides()?;
        Self::open_configured(requested, config)
    }

    /// Open the process console with an explicit configuration
    pub fn open_configured(requested: ConsoleMode, config: SessionConfig) -> ConsoleResult<Self> {
        config.validate()?;
        let platform = platform::open_console()?;
        Self::open_with(platform, requested, config)
    }

    /// Open a session over any platform handle
    pub fn open_with(
        mut platform: Box<dyn PlatformHandle>,
        requested: ConsoleMode,
        config: SessionConfig,
    ) -> ConsoleResult<Self> {
        config.validate()?;
        let mut controller = ModeController::new();
        controller.capture(platform.as_mut())?;

        let mut session = Self {
            platform,
            controller,
            bridge: SignalBridge::new()?,
            reader: EventReader::new(&config),
            config,
            state: SessionState::Uninitialized,
        };

        if let Err(e) = session.activate(&requested) {
            tracing::debug!("Session setup failed: {}", e);
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    fn activate(&mut self, requested: &ConsoleMode) -> ConsoleResult<()> {
        self.controller.apply(self.platform.as_mut(), requested)?;
        self.bridge
            .install(self.platform.as_mut(), self.config.notifications)?;
        self.state = SessionState::Active;
        tracing::debug!(?requested, "Console session active");
        Ok(())
    }

    fn ensure_active(&self) -> ConsoleResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            state => Err(ConsoleError::InvalidState(state)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Switch the console mode
    pub fn set_mode(&mut self, mode: &ConsoleMode) -> ConsoleResult<()> {
        self.ensure_active()?;
        self.controller.apply(self.platform.as_mut(), mode)
    }

    /// The live mode, read back from the console
    pub fn mode(&mut self) -> ConsoleResult<ConsoleMode> {
        self.ensure_active()?;
        self.controller.capture(self.platform.as_mut())
    }

    /// The mode the console had before the session opened
    pub fn original_mode(&self) -> Option<&ConsoleMode> {
        self.controller.original()
    }

    /// Merged stream of input bytes and notifications
    pub fn events(&mut self) -> ConsoleResult<Events<'_>> {
        self.ensure_active()?;
        Ok(Events::new(
            &mut self.reader,
            self.platform.as_mut(),
            &mut self.bridge,
        ))
    }

    pub fn dimensions(&self) -> ConsoleResult<Dimensions> {
        self.ensure_active()?;
        self.platform.query_dimensions()
    }

    /// Write all of `bytes` to the console
    pub fn write(&mut self, mut bytes: &[u8]) -> ConsoleResult<()> {
        self.ensure_active()?;
        while !bytes.is_empty() {
            let n = self.platform.write(bytes)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    pub fn write_str(&mut self, text: &str) -> ConsoleResult<()> {
        self.write(text.as_bytes())
    }

    /// Inject notifications through the same path the OS hooks use
    pub fn notifier(&self) -> NotificationSink {
        self.bridge.sink()
    }

    /// Handle that ends the event stream from any thread
    pub fn canceller(&self) -> Canceller {
        self.reader.canceller(&self.bridge)
    }

    /// Unhook notifications and restore the original mode
    ///
    /// Safe to call any number of times; only the first call does work.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;
        self.reader.cancel(&self.bridge);
        self.bridge.uninstall(self.platform.as_mut());
        self.controller.restore_original(self.platform.as_mut());
        self.state = SessionState::Closed;
        tracing::debug!("Console session closed");
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.close();
    }
}
