//! Windows console backend
//!
//! Input comes from `ReadConsoleInputW` so that window-buffer-size records
//! can be turned into Resize notifications in-band; key records are
//! converted to UTF-8. Ctrl-C and console close arrive through a console
//! control handler, which runs on its own thread.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use windows::Win32::Foundation::{BOOL, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Storage::FileSystem::WriteFile;
use windows::Win32::System::Console::{
    GetConsoleMode, GetConsoleScreenBufferInfo, GetNumberOfConsoleInputEvents, GetStdHandle,
    ReadConsoleInputW, SetConsoleCtrlHandler, SetConsoleMode, CONSOLE_MODE,
    CONSOLE_SCREEN_BUFFER_INFO, CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT, CTRL_C_EVENT,
    ENABLE_ECHO_INPUT, ENABLE_LINE_INPUT, ENABLE_PROCESSED_INPUT, ENABLE_WINDOW_INPUT,
    INPUT_RECORD, KEY_EVENT, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE, WINDOW_BUFFER_SIZE_EVENT,
};
use windows::Win32::System::Threading::WaitForMultipleObjects;

use super::{ConsoleClaim, PlatformHandle, ReadOutcome, WaitOutcome};
use crate::config::NotificationKinds;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::{Dimensions, Notification};
use crate::mode::{ConsoleMode, PlatformBits};
use crate::signal::{NotificationSink, WakeSignal};

const INPUT_WORD: usize = 0;
const OUTPUT_WORD: usize = 1;

const INTERPRETED: u32 = ENABLE_ECHO_INPUT.0 | ENABLE_LINE_INPUT.0 | ENABLE_PROCESSED_INPUT.0;

const RECORD_BATCH: usize = 64;

/// Sink used by the control handler; there is one process console
static CTRL_SINK: Mutex<Option<(NotificationSink, NotificationKinds)>> = Mutex::new(None);

fn win_err(e: windows::core::Error) -> ConsoleError {
    ConsoleError::Io(io::Error::new(io::ErrorKind::Other, e))
}

/// Console attached to the current process
#[derive(Debug)]
pub struct WindowsConsole {
    input: HANDLE,
    output: HANDLE,
    pending: VecDeque<u8>,
    high_surrogate: Option<u16>,
    sink: Option<(NotificationSink, NotificationKinds)>,
    _claim: ConsoleClaim,
}

// Standard handles are process-wide and usable from any thread.
unsafe impl Send for WindowsConsole {}

impl WindowsConsole {
    pub fn open() -> ConsoleResult<Self> {
        let claim = ConsoleClaim::acquire()?;
        // SAFETY: GetStdHandle has no preconditions
        let input = unsafe { GetStdHandle(STD_INPUT_HANDLE) }
            .map_err(|e| ConsoleError::UnavailableConsole(e.to_string()))?;
        let output = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }
            .map_err(|e| ConsoleError::UnavailableConsole(e.to_string()))?;

        let mut mode = CONSOLE_MODE(0);
        // SAFETY: mode is a valid out pointer; fails when input is not a console
        unsafe { GetConsoleMode(input, &mut mode) }.map_err(|e| {
            ConsoleError::UnavailableConsole(format!("stdin is not a console: {e}"))
        })?;

        tracing::debug!(?input, ?output, "Opened console");
        Ok(Self {
            input,
            output,
            pending: VecDeque::new(),
            high_surrogate: None,
            sink: None,
            _claim: claim,
        })
    }

    fn input_mode(&self) -> ConsoleResult<u32> {
        let mut mode = CONSOLE_MODE(0);
        // SAFETY: valid handle and out pointer
        unsafe { GetConsoleMode(self.input, &mut mode) }.map_err(win_err)?;
        Ok(mode.0)
    }

    fn output_mode(&self) -> u32 {
        let mut mode = CONSOLE_MODE(0);
        // Output redirected to a file has no console mode
        // SAFETY: valid handle and out pointer
        match unsafe { GetConsoleMode(self.output, &mut mode) } {
            Ok(()) => mode.0,
            Err(_) => 0,
        }
    }

    fn set_input_mode(&self, bits: u32) -> ConsoleResult<()> {
        // SAFETY: valid handle
        unsafe { SetConsoleMode(self.input, CONSOLE_MODE(bits)) }
            .map_err(|e| ConsoleError::UnsupportedMode(e.to_string()))
    }

    /// Pull available input records into `pending`
    fn pump_records(&mut self) -> ConsoleResult<()> {
        let mut available = 0u32;
        // SAFETY: valid handle and out pointer
        unsafe { GetNumberOfConsoleInputEvents(self.input, &mut available) }.map_err(win_err)?;
        if available == 0 {
            return Ok(());
        }

        let mut records = [INPUT_RECORD::default(); RECORD_BATCH];
        let wanted = (available as usize).min(RECORD_BATCH);
        let mut read = 0u32;
        // SAFETY: records has room for `wanted` entries; the call does not
        // block because at least that many are queued
        unsafe { ReadConsoleInputW(self.input, &mut records[..wanted], &mut read) }
            .map_err(win_err)?;

        for record in &records[..read as usize] {
            let kind = record.EventType as u32;
            if kind == KEY_EVENT as u32 {
                // SAFETY: EventType tags the active union member
                let key = unsafe { record.Event.KeyEvent };
                if !key.bKeyDown.as_bool() {
                    continue;
                }
                let unit = unsafe { key.uChar.UnicodeChar };
                if unit == 0 {
                    continue;
                }
                for _ in 0..key.wRepeatCount.max(1) {
                    self.push_utf16(unit);
                }
            } else if kind == WINDOW_BUFFER_SIZE_EVENT as u32 {
                if let Some((sink, kinds)) = &self.sink {
                    if kinds.resize {
                        let dimensions = self.query_dimensions()?;
                        sink.push(Notification::Resize(dimensions));
                    }
                }
            }
        }
        Ok(())
    }

    fn push_utf16(&mut self, unit: u16) {
        let units: Vec<u16> = match self.high_surrogate.take() {
            Some(high) if (0xDC00..=0xDFFF).contains(&unit) => vec![high, unit],
            _ if (0xD800..=0xDBFF).contains(&unit) => {
                self.high_surrogate = Some(unit);
                return;
            },
            _ => vec![unit],
        };
        let mut utf8 = [0u8; 4];
        for decoded in char::decode_utf16(units) {
            let ch = decoded.unwrap_or(char::REPLACEMENT_CHARACTER);
            self.pending
                .extend(ch.encode_utf8(&mut utf8).as_bytes().iter().copied());
        }
    }
}

impl PlatformHandle for WindowsConsole {
    fn read(&mut self, buf: &mut [u8]) -> ConsoleResult<ReadOutcome> {
        if self.pending.is_empty() {
            self.pump_records()?;
        }
        if self.pending.is_empty() {
            return Ok(ReadOutcome::WouldBlock);
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(ReadOutcome::Data(n))
    }

    fn write(&mut self, buf: &[u8]) -> ConsoleResult<usize> {
        let mut written = 0u32;
        // SAFETY: valid handle; buf outlives the synchronous call
        unsafe { WriteFile(self.output, Some(buf), Some(&mut written), None) }.map_err(win_err)?;
        Ok(written as usize)
    }

    fn get_mode(&self) -> ConsoleResult<ConsoleMode> {
        let input = self.input_mode()?;
        let mut words = [0u64; 4];
        words[INPUT_WORD] = u64::from(input & !INTERPRETED);
        words[OUTPUT_WORD] = u64::from(self.output_mode());
        Ok(ConsoleMode {
            echo: input & ENABLE_ECHO_INPUT.0 != 0,
            line_buffered: input & ENABLE_LINE_INPUT.0 != 0,
            signals_enabled: input & ENABLE_PROCESSED_INPUT.0 != 0,
            extra: Some(PlatformBits::new(words, Vec::new())),
        })
    }

    fn set_mode(&mut self, mode: &ConsoleMode) -> ConsoleResult<()> {
        let previous = self.input_mode()?;
        let mut target = match &mode.extra {
            Some(extra) => extra.word(INPUT_WORD) as u32 & !INTERPRETED,
            None => previous & !INTERPRETED,
        };
        if mode.echo {
            target |= ENABLE_ECHO_INPUT.0;
        }
        if mode.line_buffered {
            target |= ENABLE_LINE_INPUT.0;
        }
        if mode.signals_enabled {
            target |= ENABLE_PROCESSED_INPUT.0;
        }
        if self.sink.is_some() {
            target |= ENABLE_WINDOW_INPUT.0;
        }

        self.set_input_mode(target)?;

        if let Some(extra) = &mode.extra {
            let output = extra.word(OUTPUT_WORD) as u32;
            if output != self.output_mode() {
                // SAFETY: valid handle
                if let Err(e) = unsafe { SetConsoleMode(self.output, CONSOLE_MODE(output)) } {
                    if let Err(revert) = self.set_input_mode(previous) {
                        tracing::warn!("Failed to reinstate console mode: {}", revert);
                    }
                    return Err(ConsoleError::UnsupportedMode(e.to_string()));
                }
            }
        }

        tracing::trace!(input = target, "Console mode set");
        Ok(())
    }

    fn query_dimensions(&self) -> ConsoleResult<Dimensions> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        // SAFETY: valid handle and out pointer
        unsafe { GetConsoleScreenBufferInfo(self.output, &mut info) }
            .map_err(|e| ConsoleError::UnavailableConsole(e.to_string()))?;
        let window = info.srWindow;
        Ok(Dimensions::new(
            (window.Right - window.Left + 1).max(0) as u16,
            (window.Bottom - window.Top + 1).max(0) as u16,
        ))
    }

    fn wait(&mut self, wake: &WakeSignal, timeout: Duration) -> ConsoleResult<WaitOutcome> {
        if !self.pending.is_empty() {
            return Ok(WaitOutcome::Readable);
        }
        let handles = [self.input, wake.event_handle()];
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: both handles stay valid for the duration of the call
        let result = unsafe { WaitForMultipleObjects(&handles, BOOL::from(false), timeout_ms) };
        if result == WAIT_OBJECT_0 {
            Ok(WaitOutcome::Readable)
        } else if result.0 == WAIT_OBJECT_0.0 + 1 {
            Ok(WaitOutcome::Woken)
        } else if result == WAIT_TIMEOUT {
            Ok(WaitOutcome::TimedOut)
        } else {
            Err(io::Error::last_os_error().into())
        }
    }

    fn register_notifications(
        &mut self,
        sink: &NotificationSink,
        kinds: NotificationKinds,
    ) -> ConsoleResult<()> {
        if self.sink.is_some() {
            return Ok(());
        }
        *CTRL_SINK.lock().unwrap_or_else(|p| p.into_inner()) = Some((sink.clone(), kinds));
        // SAFETY: on_ctrl_event is a valid handler for the process lifetime
        unsafe { SetConsoleCtrlHandler(Some(on_ctrl_event), true) }.map_err(win_err)?;
        self.sink = Some((sink.clone(), kinds));

        if kinds.resize {
            let input = self.input_mode()?;
            self.set_input_mode(input | ENABLE_WINDOW_INPUT.0)?;
        }
        Ok(())
    }

    fn unregister_notifications(&mut self) {
        if self.sink.take().is_none() {
            return;
        }
        // SAFETY: removes the handler added in register_notifications
        if let Err(e) = unsafe { SetConsoleCtrlHandler(Some(on_ctrl_event), false) } {
            tracing::warn!("Failed to remove console control handler: {}", e);
        }
        *CTRL_SINK.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl Drop for WindowsConsole {
    fn drop(&mut self) {
        self.unregister_notifications();
        tracing::debug!("Closed console");
    }
}

unsafe extern "system" fn on_ctrl_event(ctrl_type: u32) -> BOOL {
    let guard = CTRL_SINK.lock().unwrap_or_else(|p| p.into_inner());
    let Some((sink, kinds)) = guard.as_ref() else {
        return BOOL::from(false);
    };
    let notification = match ctrl_type {
        t if (t == CTRL_C_EVENT || t == CTRL_BREAK_EVENT) && kinds.interrupt => {
            Notification::Interrupt
        },
        t if t == CTRL_CLOSE_EVENT && kinds.hangup => Notification::HangUp,
        _ => return BOOL::from(false),
    };
    sink.push(notification);
    BOOL::from(true)
}
