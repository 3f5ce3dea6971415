//! Mode controller
//!
//! The only path to [`PlatformHandle::set_mode`]. Remembers the mode the
//! console had when the session began and puts it back exactly once.

use crate::error::{ConsoleError, ConsoleResult};
use crate::mode::ConsoleMode;
use crate::platform::PlatformHandle;
use crate::session::SessionState;

#[derive(Debug, Default)]
pub struct ModeController {
    original: Option<ConsoleMode>,
    current: Option<ConsoleMode>,
    restored: bool,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the live mode; the first capture becomes the original
    pub fn capture(&mut self, platform: &mut dyn PlatformHandle) -> ConsoleResult<ConsoleMode> {
        let live = platform.get_mode()?;
        if self.original.is_none() {
            tracing::debug!(
                echo = live.echo,
                line_buffered = live.line_buffered,
                signals = live.signals_enabled,
                "Captured original console mode"
            );
            self.original = Some(live.clone());
        }
        Ok(live)
    }

    /// Switch to `mode`
    ///
    /// Re-applying the last applied mode makes no platform call.
    pub fn apply(
        &mut self,
        platform: &mut dyn PlatformHandle,
        mode: &ConsoleMode,
    ) -> ConsoleResult<()> {
        if self.original.is_none() {
            return Err(ConsoleError::InvalidState(SessionState::Uninitialized));
        }
        if self.restored {
            return Err(ConsoleError::InvalidState(SessionState::Closed));
        }
        if self.current.as_ref() == Some(mode) {
            tracing::trace!("Console mode unchanged");
            return Ok(());
        }

        platform.set_mode(mode)?;
        self.current = Some(mode.clone());
        Ok(())
    }

    /// Put the original mode back
    ///
    /// Runs at most once; later calls do nothing. Failure is logged, never
    /// returned, since this runs on teardown paths. Makes no platform call
    /// when no mode was ever applied.
    pub fn restore_original(&mut self, platform: &mut dyn PlatformHandle) {
        if self.restored {
            return;
        }
        self.restored = true;
        if self.current.is_none() {
            tracing::trace!("No mode applied, nothing to restore");
            return;
        }
        let Some(original) = self.original.as_ref() else {
            return;
        };
        match platform.set_mode(original) {
            Ok(()) => tracing::debug!("Restored original console mode"),
            Err(e) => tracing::warn!("Failed to restore original console mode: {}", e),
        }
        self.current = None;
    }

    pub fn original(&self) -> Option<&ConsoleMode> {
        self.original.as_ref()
    }

    /// Last mode successfully applied through this controller
    pub fn current(&self) -> Option<&ConsoleMode> {
        self.current.as_ref()
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::PlatformBits;
    use crate::platform::VirtualConsole;

    #[test]
    fn test_apply_requires_capture() {
        let mut platform = VirtualConsole::new();
        let mut controller = ModeController::new();
        let err = controller
            .apply(&mut platform, &ConsoleMode::raw())
            .unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::InvalidState(SessionState::Uninitialized)
        ));
    }

    #[test]
    fn test_capture_keeps_first_original() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();

        let first = controller.capture(&mut platform).unwrap();
        controller.apply(&mut platform, &ConsoleMode::raw()).unwrap();
        let second = controller.capture(&mut platform).unwrap();

        assert!(second.is_raw());
        assert_eq!(controller.original(), Some(&first));
    }

    #[test]
    fn test_apply_same_mode_is_noop() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        controller.capture(&mut platform).unwrap();

        controller.apply(&mut platform, &ConsoleMode::cbreak()).unwrap();
        controller.apply(&mut platform, &ConsoleMode::cbreak()).unwrap();
        assert_eq!(console.stats().set_mode_calls, 1);

        controller.apply(&mut platform, &ConsoleMode::raw()).unwrap();
        assert_eq!(console.stats().set_mode_calls, 2);
    }

    #[test]
    fn test_round_trip_with_extra() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        controller.capture(&mut platform).unwrap();

        let wanted = ConsoleMode::raw().with_extra(Some(PlatformBits::new([7, 0, 3, 0], vec![1, 2])));
        controller.apply(&mut platform, &wanted).unwrap();
        assert_eq!(controller.capture(&mut platform).unwrap(), wanted);
    }

    #[test]
    fn test_rejection_keeps_current() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        controller.capture(&mut platform).unwrap();
        controller.apply(&mut platform, &ConsoleMode::cbreak()).unwrap();

        console.reject_bits(0, 0x1);
        let bad = ConsoleMode::raw().with_extra(Some(PlatformBits::default().with_word(0, 0x1)));
        assert!(matches!(
            controller.apply(&mut platform, &bad),
            Err(ConsoleError::UnsupportedMode(_))
        ));
        assert_eq!(controller.current(), Some(&ConsoleMode::cbreak()));
    }

    #[test]
    fn test_restore_runs_once() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        let original = controller.capture(&mut platform).unwrap();
        controller.apply(&mut platform, &ConsoleMode::raw()).unwrap();

        controller.restore_original(&mut platform);
        controller.restore_original(&mut platform);
        assert_eq!(console.stats().set_mode_calls, 2);
        assert_eq!(console.current_mode(), original);
        assert!(controller.is_restored());

        assert!(matches!(
            controller.apply(&mut platform, &ConsoleMode::raw()),
            Err(ConsoleError::InvalidState(SessionState::Closed))
        ));
    }

    #[test]
    fn test_restore_without_apply_is_silent() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        controller.capture(&mut platform).unwrap();

        console.reject_bits(1, 0x4);
        let bad = ConsoleMode::raw().with_extra(Some(PlatformBits::default().with_word(1, 0x4)));
        assert!(controller.apply(&mut platform, &bad).is_err());

        controller.restore_original(&mut platform);
        assert!(controller.is_restored());
        assert_eq!(console.stats().set_mode_calls, 1);
    }

    #[test]
    fn test_restore_failure_is_swallowed() {
        let console = VirtualConsole::new();
        let mut platform = console.clone();
        let mut controller = ModeController::new();
        controller.capture(&mut platform).unwrap();
        controller.apply(&mut platform, &ConsoleMode::raw()).unwrap();

        console.fail_set_mode(true);
        controller.restore_original(&mut platform);
        controller.restore_original(&mut platform);
        assert!(controller.is_restored());
        assert_eq!(console.stats().set_mode_calls, 2);
    }
}
