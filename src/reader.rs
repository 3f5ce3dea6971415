//! Event reader
//!
//! Merges console bytes and bridged notifications into one ordered stream.
//! Each cycle drains the bridge, attempts one non-blocking read and only
//! then waits, so notifications detected before a chunk of input always
//! come out ahead of it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::ConsoleResult;
use crate::event::{InputEvent, Notification};
use crate::platform::{PlatformHandle, ReadOutcome, WaitOutcome};
use crate::signal::{NotificationSink, SignalBridge};

/// Stops an event stream from any thread
#[derive(Debug, Clone)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
    sink: NotificationSink,
}

impl Canceller {
    /// Request the stream to end; the reader yields `Eof` on its next cycle
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.sink.wake_reader();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct EventReader {
    cancelled: Arc<AtomicBool>,
    pending: VecDeque<ConsoleResult<InputEvent>>,
    finished: bool,
    buf: Vec<u8>,
    poll_timeout: Duration,
}

impl EventReader {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            pending: VecDeque::new(),
            finished: false,
            buf: vec![0; config.read_buffer_size.max(1)],
            poll_timeout: config.poll_timeout(),
        }
    }

    /// A handle that cancels this reader and wakes it through `bridge`
    pub fn canceller(&self, bridge: &SignalBridge) -> Canceller {
        Canceller {
            flag: Arc::clone(&self.cancelled),
            sink: bridge.sink(),
        }
    }

    /// Cancel from the owning thread; see [`Canceller::cancel`]
    pub fn cancel(&self, bridge: &SignalBridge) {
        self.cancelled.store(true, Ordering::SeqCst);
        bridge.wake().notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the terminal `Eof` has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Produce the next event, blocking in bounded wait steps
    ///
    /// Returns `None` once the stream has ended.
    pub fn next_event(
        &mut self,
        platform: &mut dyn PlatformHandle,
        bridge: &mut SignalBridge,
    ) -> Option<ConsoleResult<InputEvent>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }

            // Clear before draining so that a push racing the drain keeps
            // the wake signal raised for the wait below.
            bridge.wake().clear();
            self.collect_notifications(bridge);

            if !self.finished {
                if self.is_cancelled() {
                    tracing::debug!("Event stream cancelled");
                    self.finish();
                } else {
                    self.read_once(platform, bridge);
                }
            }

            if !self.pending.is_empty() || self.finished {
                continue;
            }

            match platform.wait(bridge.wake(), self.poll_timeout) {
                Ok(WaitOutcome::TimedOut) => tracing::trace!("Wait step timed out"),
                Ok(outcome) => tracing::trace!(?outcome, "Wait step returned"),
                Err(e) => self.pending.push_back(Err(e)),
            }
        }
    }

    fn collect_notifications(&mut self, bridge: &mut SignalBridge) {
        for notification in bridge.drain() {
            self.pending
                .push_back(Ok(InputEvent::Notification(notification)));
            if notification == Notification::Eof {
                tracing::debug!("End of input");
                self.finished = true;
                return;
            }
        }
    }

    fn read_once(&mut self, platform: &mut dyn PlatformHandle, bridge: &SignalBridge) {
        match platform.read(&mut self.buf) {
            Ok(ReadOutcome::Data(n)) => {
                tracing::trace!(bytes = n, "Console input");
                self.pending
                    .push_back(Ok(InputEvent::Bytes(self.buf[..n].to_vec())));
            },
            Ok(ReadOutcome::WouldBlock) => {},
            Ok(ReadOutcome::Closed) => {
                bridge.sink().push(Notification::Eof);
            },
            Err(e) => {
                tracing::debug!("Console read failed: {}", e);
                self.pending.push_back(Err(e));
            },
        }
    }

    fn finish(&mut self) {
        self.pending
            .push_back(Ok(InputEvent::Notification(Notification::Eof)));
        self.finished = true;
    }
}

/// Iterator over a session's merged input
///
/// Ends after the first `Eof`; every later `next()` returns `None`.
pub struct Events<'a> {
    reader: &'a mut EventReader,
    platform: &'a mut dyn PlatformHandle,
    bridge: &'a mut SignalBridge,
}

impl<'a> Events<'a> {
    pub(crate) fn new(
        reader: &'a mut EventReader,
        platform: &'a mut dyn PlatformHandle,
        bridge: &'a mut SignalBridge,
    ) -> Self {
        Self {
            reader,
            platform,
            bridge,
        }
    }
}

impl Iterator for Events<'_> {
    type Item = ConsoleResult<InputEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_event(self.platform, self.bridge)
    }
}
