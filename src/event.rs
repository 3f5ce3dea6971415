//! Event types delivered by a console session

use serde::{Deserialize, Serialize};

/// Console size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Number of columns (characters)
    pub columns: u16,
    /// Number of rows (characters)
    pub rows: u16,
}

impl Dimensions {
    /// Create a new size
    pub const fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

#[cfg(unix)]
impl From<libc::winsize> for Dimensions {
    fn from(ws: libc::winsize) -> Self {
        Self {
            columns: ws.ws_col,
            rows: ws.ws_row,
        }
    }
}

/// Asynchronous, OS-originated condition
///
/// This is the complete set; nothing else is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Notification {
    /// The console changed size
    Resize(Dimensions),
    /// The interrupt key was pressed (SIGINT / CTRL_C_EVENT)
    Interrupt,
    /// The console went away (SIGHUP / CTRL_CLOSE_EVENT)
    HangUp,
    /// End of the input stream; nothing follows it
    Eof,
}

impl Notification {
    /// Short lowercase name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Notification::Resize(_) => "resize",
            Notification::Interrupt => "interrupt",
            Notification::HangUp => "hangup",
            Notification::Eof => "eof",
        }
    }
}

/// One unit of the merged input stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// Raw bytes exactly as read (never empty, never reassembled)
    Bytes(Vec<u8>),
    /// A notification drained from the signal bridge
    Notification(Notification),
}

impl InputEvent {
    /// The raw bytes, if this is a byte chunk
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            InputEvent::Bytes(bytes) => Some(bytes),
            InputEvent::Notification(_) => None,
        }
    }

    /// The notification, if this is one
    pub fn notification(&self) -> Option<Notification> {
        match self {
            InputEvent::Notification(n) => Some(*n),
            InputEvent::Bytes(_) => None,
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, InputEvent::Notification(Notification::Eof))
    }
}

impl From<Notification> for InputEvent {
    fn from(n: Notification) -> Self {
        InputEvent::Notification(n)
    }
}
