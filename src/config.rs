//! Session configuration
//!
//! Precedence, lowest first: defaults, TOML file, environment, explicit
//! overrides made by the caller (the probe binary maps its CLI flags here).

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, ConsoleResult};

/// Environment variable overriding `poll_timeout_ms`
pub const POLL_TIMEOUT_ENV: &str = "MOCHI_CONSOLE_POLL_MS";

/// Environment variable overriding `read_buffer_size`
pub const READ_BUFFER_ENV: &str = "MOCHI_CONSOLE_READ_BUFFER";

const DEFAULT_POLL_TIMEOUT_MS: u64 = 50;
const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
const MAX_POLL_TIMEOUT_MS: u64 = 10_000;

/// Which OS notifications the session hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationKinds {
    /// SIGWINCH / window-buffer-size records
    pub resize: bool,
    /// SIGINT / CTRL_C_EVENT
    pub interrupt: bool,
    /// SIGHUP / CTRL_CLOSE_EVENT
    pub hangup: bool,
}

impl NotificationKinds {
    /// Hook nothing
    pub const fn none() -> Self {
        Self {
            resize: false,
            interrupt: false,
            hangup: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.resize || self.interrupt || self.hangup)
    }
}

impl Default for NotificationKinds {
    fn default() -> Self {
        Self {
            resize: true,
            interrupt: true,
            hangup: true,
        }
    }
}

/// Tunables for a console session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound of one reader wait step, in milliseconds
    pub poll_timeout_ms: u64,
    /// Largest chunk handed out by a single read
    pub read_buffer_size: usize,
    /// Notifications to hook
    pub notifications: NotificationKinds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            notifications: NotificationKinds::default(),
        }
    }
}

impl SessionConfig {
    /// The wait-step bound as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_notifications(mut self, kinds: NotificationKinds) -> Self {
        self.notifications = kinds;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> ConsoleResult<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| ConsoleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> ConsoleResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `MOCHI_CONSOLE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> ConsoleResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment-shaped)
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConsoleResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(POLL_TIMEOUT_ENV) {
            self.poll_timeout_ms = value.trim().parse().map_err(|_| {
                ConsoleError::Config(format!("{POLL_TIMEOUT_ENV}: not a number: {value:?}"))
            })?;
        }
        if let Some(value) = lookup(READ_BUFFER_ENV) {
            self.read_buffer_size = value.trim().parse().map_err(|_| {
                ConsoleError::Config(format!("{READ_BUFFER_ENV}: not a number: {value:?}"))
            })?;
        }
        self.validate()
    }

    /// Reject values the reader cannot work with
    pub fn validate(&self) -> ConsoleResult<()> {
        if self.poll_timeout_ms == 0 {
            return Err(ConsoleError::Config(
                "poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_timeout_ms > MAX_POLL_TIMEOUT_MS {
            return Err(ConsoleError::Config(format!(
                "poll_timeout_ms must be at most {MAX_POLL_TIMEOUT_MS}"
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(ConsoleError::Config(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_timeout(), Duration::from_millis(50));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.notifications, NotificationKinds::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            poll_timeout_ms = 20

            [notifications]
            hangup = false
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_timeout_ms, 20);
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.notifications.resize);
        assert!(config.notifications.interrupt);
        assert!(!config.notifications.hangup);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("poll_timeout_ms = 0"),
            Err(ConsoleError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("read_buffer_size = 0"),
            Err(ConsoleError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("poll_timeout_ms = 60000"),
            Err(ConsoleError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("poll_timeout_ms = \"fast\""),
            Err(ConsoleError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_buffer_size = 4096").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConsoleError::Config(msg) if msg.contains("absent.toml")));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(POLL_TIMEOUT_ENV, "5"), (READ_BUFFER_ENV, " 64 ")]);
        let mut config = SessionConfig::default();
        config
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.poll_timeout_ms, 5);
        assert_eq!(config.read_buffer_size, 64);
    }

    #[test]
    fn test_override_garbage() {
        let mut config = SessionConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == POLL_TIMEOUT_ENV).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConsoleError::Config(_))));
    }

    #[test]
    fn test_notification_kinds_none() {
        assert!(NotificationKinds::none().is_empty());
        assert!(!NotificationKinds::default().is_empty());
    }
}
