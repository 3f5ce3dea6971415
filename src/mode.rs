//! Console mode values
//!
//! A [`ConsoleMode`] carries the three flags the session reasons about
//! (echo, line buffering, signal generation) plus an optional opaque
//! [`PlatformBits`] snapshot of everything else the OS keeps for the device.
//!
//! Modes captured from a live console always carry `extra`; the interpreted
//! flags are masked out of it, so the three booleans are the only place those
//! bits live. Modes built by callers usually leave `extra` as `None`, which
//! means "keep whatever the platform currently has".

use serde::{Deserialize, Serialize};

/// Opaque platform-specific mode bits
///
/// On POSIX the four words are the termios input, output, control and local
/// flags and `control_chars` is `c_cc`. On Windows word 0 is the input handle
/// mode and word 1 the output handle mode. Editing these by hand works but is
/// not portable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformBits {
    words: [u64; 4],
    control_chars: Vec<u8>,
}

impl PlatformBits {
    /// Create a snapshot from raw flag words and a control character table
    pub fn new(words: [u64; 4], control_chars: Vec<u8>) -> Self {
        Self {
            words,
            control_chars,
        }
    }

    /// All four flag words
    pub fn words(&self) -> [u64; 4] {
        self.words
    }

    /// A single flag word
    ///
    /// # Panics
    /// Panics if `index >= 4`.
    pub fn word(&self, index: usize) -> u64 {
        self.words[index]
    }

    /// Replace one flag word
    ///
    /// # Panics
    /// Panics if `index >= 4`.
    pub fn with_word(mut self, index: usize, value: u64) -> Self {
        self.words[index] = value;
        self
    }

    /// The control character table (empty where the platform has none)
    pub fn control_chars(&self) -> &[u8] {
        &self.control_chars
    }
}

/// Logical console mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsoleMode {
    /// Typed characters are echoed back by the OS
    pub echo: bool,
    /// The OS collects input into lines and provides line editing (cooked)
    pub line_buffered: bool,
    /// Interrupt/quit/suspend keys generate signals instead of bytes
    pub signals_enabled: bool,
    /// Everything else, as an opaque platform snapshot
    pub extra: Option<PlatformBits>,
}

impl ConsoleMode {
    /// Create a mode from the three portable flags, leaving platform bits alone
    pub const fn new(echo: bool, line_buffered: bool, signals_enabled: bool) -> Self {
        Self {
            echo,
            line_buffered,
            signals_enabled,
            extra: None,
        }
    }

    /// Ordinary interactive mode: echo, line editing, signals
    pub const fn cooked() -> Self {
        Self::new(true, true, true)
    }

    /// Bytes go straight to the application; Ctrl-C arrives as 0x03
    pub const fn raw() -> Self {
        Self::new(false, false, false)
    }

    /// Character-at-a-time input without echo, keeping signal keys as signals
    pub const fn cbreak() -> Self {
        Self::new(false, false, true)
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_line_buffered(mut self, line_buffered: bool) -> Self {
        self.line_buffered = line_buffered;
        self
    }

    pub fn with_signals(mut self, signals_enabled: bool) -> Self {
        self.signals_enabled = signals_enabled;
        self
    }

    pub fn with_extra(mut self, extra: Option<PlatformBits>) -> Self {
        self.extra = extra;
        self
    }

    /// Whether the three portable flags match, ignoring platform bits
    pub fn same_flags(&self, other: &ConsoleMode) -> bool {
        self.echo == other.echo
            && self.line_buffered == other.line_buffered
            && self.signals_enabled == other.signals_enabled
    }

    /// No echo, no line editing, no signal generation
    pub fn is_raw(&self) -> bool {
        !self.echo && !self.line_buffered && !self.signals_enabled
    }
}

impl Default for ConsoleMode {
    fn default() -> Self {
        Self::cbreak()
    }
}
