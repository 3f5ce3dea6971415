//! Wake-up primitive for the reader's wait step
//!
//! POSIX: a non-blocking self-pipe. `notify` is an atomic store plus one
//! `write(2)`, both async-signal-safe. Windows: a manual-reset event.

use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

#[cfg(unix)]
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};

#[cfg(windows)]
use windows::core::PCWSTR;
#[cfg(windows)]
use windows::Win32::Foundation::{CloseHandle, HANDLE};
#[cfg(windows)]
use windows::Win32::System::Threading::{CreateEventW, ResetEvent, SetEvent};

use crate::error::ConsoleResult;

/// Level-triggered wake flag backed by an OS waitable object
#[derive(Debug)]
pub struct WakeSignal {
    flag: AtomicBool,
    #[cfg(unix)]
    read_fd: OwnedFd,
    #[cfg(unix)]
    write_fd: OwnedFd,
    #[cfg(windows)]
    event: HANDLE,
}

// The event handle is only used through thread-safe kernel calls.
#[cfg(windows)]
unsafe impl Send for WakeSignal {}
#[cfg(windows)]
unsafe impl Sync for WakeSignal {}

impl WakeSignal {
    #[cfg(unix)]
    pub fn new() -> ConsoleResult<Self> {
        let (read_fd, write_fd) = nix::unistd::pipe()?;
        for fd in [read_fd.as_raw_fd(), write_fd.as_raw_fd()] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        Ok(Self {
            flag: AtomicBool::new(false),
            read_fd,
            write_fd,
        })
    }

    #[cfg(windows)]
    pub fn new() -> ConsoleResult<Self> {
        // SAFETY: plain kernel object creation; the handle is closed in Drop
        let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Self {
            flag: AtomicBool::new(false),
            event,
        })
    }

    /// Raise the flag and wake any waiter. Async-signal-safe.
    pub fn notify(&self) {
        self.flag.store(true, Ordering::SeqCst);
        #[cfg(unix)]
        {
            let byte = 1u8;
            // SAFETY: write(2) on an fd we own; a full pipe (EAGAIN) already
            // guarantees the waiter will wake, so the result is irrelevant.
            unsafe {
                libc::write(
                    self.write_fd.as_raw_fd(),
                    (&byte as *const u8).cast::<libc::c_void>(),
                    1,
                );
            }
        }
        #[cfg(windows)]
        {
            // SAFETY: valid event handle owned by self
            let _ = unsafe { SetEvent(self.event) };
        }
    }

    /// Whether `notify` ran since the last `clear`
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lower the flag and consume pending wake-ups
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
        #[cfg(unix)]
        {
            let mut buf = [0u8; 64];
            loop {
                // SAFETY: read(2) into a local buffer from a non-blocking fd we own
                let n = unsafe {
                    libc::read(
                        self.read_fd.as_raw_fd(),
                        buf.as_mut_ptr().cast::<libc::c_void>(),
                        buf.len(),
                    )
                };
                if n <= 0 {
                    break;
                }
            }
        }
        #[cfg(windows)]
        {
            // SAFETY: valid event handle owned by self
            let _ = unsafe { ResetEvent(self.event) };
        }
    }

    /// Readable end of the self-pipe, for `poll(2)`
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    /// Event handle, for `WaitForMultipleObjects`
    #[cfg(windows)]
    pub fn event_handle(&self) -> HANDLE {
        self.event
    }
}

#[cfg(windows)]
impl Drop for WakeSignal {
    fn drop(&mut self) {
        // SAFETY: handle created in new() and not closed elsewhere
        let _ = unsafe { CloseHandle(self.event) };
    }
}
