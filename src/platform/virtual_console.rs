//! In-memory console
//!
//! Behaves like a terminal without touching one: input is scripted, output
//! is captured and mode changes are recorded. Clones share state, so a test
//! keeps one clone as a remote control while the session owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{PlatformHandle, ReadOutcome, WaitOutcome};
use crate::config::NotificationKinds;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::{Dimensions, Notification};
use crate::mode::{ConsoleMode, PlatformBits};
use crate::signal::{NotificationSink, WakeSignal};

/// Granularity of the simulated wait step
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Call counters recorded by a [`VirtualConsole`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualStats {
    pub get_mode_calls: usize,
    pub set_mode_calls: usize,
    pub reads: usize,
    pub waits: usize,
    pub registrations: usize,
    pub unregistrations: usize,
}

#[derive(Debug)]
struct VirtualState {
    mode: ConsoleMode,
    dimensions: Dimensions,
    input: VecDeque<u8>,
    input_closed: bool,
    output: Vec<u8>,
    write_chunk: Option<usize>,
    rejected_bits: [u64; 4],
    fail_set_mode: bool,
    read_errors: VecDeque<io::ErrorKind>,
    sink: Option<(NotificationSink, NotificationKinds)>,
    stats: VirtualStats,
}

/// Scriptable console for tests and embedders
#[derive(Debug, Clone)]
pub struct VirtualConsole {
    state: Arc<Mutex<VirtualState>>,
}

impl Default for VirtualConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualConsole {
    /// A cooked 80x24 console with no pending input
    pub fn new() -> Self {
        Self::with_mode(ConsoleMode::cooked())
    }

    /// Start from `mode`; an absent `extra` becomes an all-zero snapshot
    pub fn with_mode(mut mode: ConsoleMode) -> Self {
        if mode.extra.is_none() {
            mode.extra = Some(PlatformBits::default());
        }
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                mode,
                dimensions: Dimensions::default(),
                input: VecDeque::new(),
                input_closed: false,
                output: Vec::new(),
                write_chunk: None,
                rejected_bits: [0; 4],
                fail_set_mode: false,
                read_errors: VecDeque::new(),
                sink: None,
                stats: VirtualStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make bytes available to `read`
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    /// Report end of input once the queued bytes are consumed
    pub fn close_input(&self) {
        self.lock().input_closed = true;
    }

    /// Fail the next read with an error of `kind`
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.lock().read_errors.push_back(kind);
    }

    /// Everything written so far
    pub fn output(&self) -> Vec<u8> {
        self.lock().output.clone()
    }

    /// Accept at most `chunk` bytes per write call
    pub fn set_write_chunk(&self, chunk: Option<usize>) {
        self.lock().write_chunk = chunk;
    }

    /// Reject any mode whose `extra` word `index` intersects `mask`
    pub fn reject_bits(&self, index: usize, mask: u64) {
        if let Some(word) = self.lock().rejected_bits.get_mut(index) {
            *word |= mask;
        }
    }

    /// Make every `set_mode` fail with an I/O error
    pub fn fail_set_mode(&self, fail: bool) {
        self.lock().fail_set_mode = fail;
    }

    /// The live mode, without counting a `get_mode` call
    pub fn current_mode(&self) -> ConsoleMode {
        self.lock().mode.clone()
    }

    pub fn stats(&self) -> VirtualStats {
        self.lock().stats
    }

    /// Change the size and raise Resize when hooked
    pub fn resize(&self, dimensions: Dimensions) {
        let mut state = self.lock();
        state.dimensions = dimensions;
        if let Some((sink, kinds)) = &state.sink {
            if kinds.resize {
                sink.push(Notification::Resize(dimensions));
            }
        }
    }

    /// Simulate Ctrl-C
    pub fn interrupt(&self) {
        let state = self.lock();
        if let Some((sink, kinds)) = &state.sink {
            if kinds.interrupt && state.mode.signals_enabled {
                sink.push(Notification::Interrupt);
            }
        }
    }

    /// Simulate the terminal going away
    pub fn hang_up(&self) {
        let mut state = self.lock();
        state.input_closed = true;
        if let Some((sink, kinds)) = &state.sink {
            if kinds.hangup {
                sink.push(Notification::HangUp);
            }
        }
    }

    /// Whether notifications are currently hooked
    pub fn is_hooked(&self) -> bool {
        self.lock().sink.is_some()
    }
}

impl PlatformHandle for VirtualConsole {
    fn read(&mut self, buf: &mut [u8]) -> ConsoleResult<ReadOutcome> {
        let mut state = self.lock();
        state.stats.reads += 1;
        if let Some(kind) = state.read_errors.pop_front() {
            return Err(io::Error::new(kind, "scripted read failure").into());
        }
        if state.input.is_empty() {
            return Ok(if state.input_closed {
                ReadOutcome::Closed
            } else {
                ReadOutcome::WouldBlock
            });
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(ReadOutcome::Data(n))
    }

    fn write(&mut self, buf: &[u8]) -> ConsoleResult<usize> {
        let mut state = self.lock();
        let n = state.write_chunk.map_or(buf.len(), |chunk| chunk.min(buf.len()));
        state.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn get_mode(&self) -> ConsoleResult<ConsoleMode> {
        let mut state = self.lock();
        state.stats.get_mode_calls += 1;
        Ok(state.mode.clone())
    }

    fn set_mode(&mut self, mode: &ConsoleMode) -> ConsoleResult<()> {
        let mut state = self.lock();
        state.stats.set_mode_calls += 1;
        if state.fail_set_mode {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted set_mode failure").into());
        }
        if let Some(extra) = &mode.extra {
            let words = extra.words();
            if words
                .iter()
                .zip(state.rejected_bits.iter())
                .any(|(word, mask)| word & mask != 0)
            {
                return Err(ConsoleError::UnsupportedMode(format!(
                    "virtual console rejects {:?}",
                    words
                )));
            }
        }

        let extra = mode.extra.clone().or_else(|| state.mode.extra.clone());
        state.mode = ConsoleMode {
            extra,
            ..mode.clone()
        };
        Ok(())
    }

    fn query_dimensions(&self) -> ConsoleResult<Dimensions> {
        Ok(self.lock().dimensions)
    }

    fn wait(&mut self, wake: &WakeSignal, timeout: Duration) -> ConsoleResult<WaitOutcome> {
        self.lock().stats.waits += 1;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.lock();
                if !state.input.is_empty() || state.input_closed || !state.read_errors.is_empty() {
                    return Ok(WaitOutcome::Readable);
                }
            }
            if wake.is_set() {
                return Ok(WaitOutcome::Woken);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }

    fn register_notifications(
        &mut self,
        sink: &NotificationSink,
        kinds: NotificationKinds,
    ) -> ConsoleResult<()> {
        let mut state = self.lock();
        state.stats.registrations += 1;
        state.sink = Some((sink.clone(), kinds));
        Ok(())
    }

    fn unregister_notifications(&mut self) {
        let mut state = self.lock();
        state.stats.unregistrations += 1;
        state.sink = None;
    }
}
