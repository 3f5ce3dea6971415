//! POSIX console backend
//!
//! Talks to the controlling terminal through termios and `ioctl`. The
//! descriptor is non-blocking so that `read` never stalls the reader loop;
//! the original file status flags are put back on drop.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{
    tcgetattr, tcsetattr, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};

use super::{ConsoleClaim, PlatformHandle, ReadOutcome, WaitOutcome};
use crate::config::NotificationKinds;
use crate::error::{ConsoleError, ConsoleResult};
use crate::event::Dimensions;
use crate::mode::{ConsoleMode, PlatformBits};
use crate::signal::posix::{self, PosixHooks};
use crate::signal::{NotificationSink, WakeSignal};

const TTY_PATH: &str = "/dev/tty";

/// Word layout of [`PlatformBits`] on POSIX
const INPUT_WORD: usize = 0;
const OUTPUT_WORD: usize = 1;
const CONTROL_WORD: usize = 2;
const LOCAL_WORD: usize = 3;

/// Controlling terminal of the current process
#[derive(Debug)]
pub struct UnixConsole {
    tty: File,
    original_flags: OFlag,
    hooks: Option<PosixHooks>,
    _claim: ConsoleClaim,
}

impl UnixConsole {
    /// Open `/dev/tty`, falling back to stdin when it is a terminal
    ///
    /// Fails with `AlreadyOpen` while another `UnixConsole` is alive.
    pub fn open() -> ConsoleResult<Self> {
        let claim = ConsoleClaim::acquire()?;
        let tty = open_tty()?;
        let fd = tty.as_raw_fd();

        let original_flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(original_flags | OFlag::O_NONBLOCK))?;

        tracing::debug!(fd, "Opened console");
        Ok(Self {
            tty,
            original_flags,
            hooks: None,
            _claim: claim,
        })
    }

    /// Raw descriptor of the console
    pub fn raw_fd(&self) -> RawFd {
        self.tty.as_raw_fd()
    }

    fn poll_writable(&self) -> io::Result<()> {
        let mut fds = [libc::pollfd {
            fd: self.tty.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        }];
        // SAFETY: fds is a valid one-element array for the duration of the call
        let result = unsafe { libc::poll(fds.as_mut_ptr(), 1, -1) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn open_tty() -> ConsoleResult<File> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(TTY_PATH)
    {
        Ok(file) => return Ok(file),
        Err(e) => tracing::debug!("{} unavailable: {}", TTY_PATH, e),
    }

    let stdin = io::stdin();
    // SAFETY: isatty only inspects the descriptor
    if unsafe { libc::isatty(stdin.as_raw_fd()) } != 1 {
        return Err(ConsoleError::UnavailableConsole(
            "no controlling terminal and stdin is not a tty".to_string(),
        ));
    }
    // try_clone_to_owned duplicates with close-on-exec set
    let fd = stdin
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| ConsoleError::UnavailableConsole(format!("dup(stdin): {e}")))?;
    Ok(File::from(fd))
}

impl Drop for UnixConsole {
    fn drop(&mut self) {
        self.hooks = None;
        if let Err(e) = fcntl(self.tty.as_raw_fd(), FcntlArg::F_SETFL(self.original_flags)) {
            tracing::warn!("Failed to restore console file flags: {}", e);
        }
        tracing::debug!("Closed console");
    }
}

impl PlatformHandle for UnixConsole {
    fn read(&mut self, buf: &mut [u8]) -> ConsoleResult<ReadOutcome> {
        loop {
            match nix::unistd::read(self.tty.as_raw_fd(), buf) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(Errno::EAGAIN) => return Ok(ReadOutcome::WouldBlock),
                Err(Errno::EINTR) => continue,
                // The terminal went away (hang-up on the controlling tty)
                Err(Errno::EIO) => return Ok(ReadOutcome::Closed),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> ConsoleResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match nix::unistd::write(&self.tty, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EAGAIN) => self.poll_writable()?,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn get_mode(&self) -> ConsoleResult<ConsoleMode> {
        let termios = tcgetattr(&self.tty)?;
        Ok(mode_from_termios(&termios))
    }

    fn set_mode(&mut self, mode: &ConsoleMode) -> ConsoleResult<()> {
        let previous = tcgetattr(&self.tty)?;
        let mut target = previous.clone();
        apply_to_termios(&mut target, mode);

        match tcsetattr(&self.tty, SetArg::TCSADRAIN, &target) {
            Ok(()) => {},
            Err(Errno::EINVAL) => {
                return Err(ConsoleError::UnsupportedMode(
                    "tcsetattr rejected the attributes".to_string(),
                ))
            },
            Err(e) => return Err(e.into()),
        }

        // tcsetattr succeeds if any change was applied; check all of them were
        let actual = tcgetattr(&self.tty)?;
        if !same_attributes(&actual, &target) {
            if let Err(e) = tcsetattr(&self.tty, SetArg::TCSADRAIN, &previous) {
                tracing::warn!("Failed to reinstate console mode: {}", e);
            }
            return Err(ConsoleError::UnsupportedMode(format!(
                "terminal applied only part of {:?}",
                mode
            )));
        }

        tracing::trace!(
            echo = mode.echo,
            line_buffered = mode.line_buffered,
            signals = mode.signals_enabled,
            "Console mode set"
        );
        Ok(())
    }

    fn query_dimensions(&self) -> ConsoleResult<Dimensions> {
        posix::probe_dimensions(self.tty.as_raw_fd()).ok_or_else(|| {
            ConsoleError::UnavailableConsole(format!(
                "TIOCGWINSZ failed: {}",
                io::Error::last_os_error()
            ))
        })
    }

    fn wait(&mut self, wake: &WakeSignal, timeout: Duration) -> ConsoleResult<WaitOutcome> {
        let mut fds = [
            libc::pollfd {
                fd: self.tty.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: fds is a valid two-element array for the duration of the call
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            // A signal landed; its handler already fired the wake signal
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(WaitOutcome::Woken);
            }
            return Err(err.into());
        }
        if ready == 0 {
            return Ok(WaitOutcome::TimedOut);
        }
        if fds[1].revents & libc::POLLIN != 0 {
            return Ok(WaitOutcome::Woken);
        }
        // POLLHUP/POLLERR count as readable so that read() reports them
        Ok(WaitOutcome::Readable)
    }

    fn register_notifications(
        &mut self,
        sink: &NotificationSink,
        kinds: NotificationKinds,
    ) -> ConsoleResult<()> {
        if self.hooks.is_some() {
            return Ok(());
        }
        self.hooks = Some(posix::install(sink, self.tty.as_raw_fd(), kinds)?);
        Ok(())
    }

    fn unregister_notifications(&mut self) {
        self.hooks = None;
    }
}

/// Interpret termios, masking the interpreted flags out of the snapshot
fn mode_from_termios(termios: &Termios) -> ConsoleMode {
    let local = termios.local_flags;
    let opaque_local = local & !(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG);

    let mut words = [0u64; 4];
    words[INPUT_WORD] = termios.input_flags.bits() as u64;
    words[OUTPUT_WORD] = termios.output_flags.bits() as u64;
    words[CONTROL_WORD] = termios.control_flags.bits() as u64;
    words[LOCAL_WORD] = opaque_local.bits() as u64;

    ConsoleMode {
        echo: local.contains(LocalFlags::ECHO),
        line_buffered: local.contains(LocalFlags::ICANON),
        signals_enabled: local.contains(LocalFlags::ISIG),
        extra: Some(PlatformBits::new(words, termios.control_chars.to_vec())),
    }
}

fn apply_to_termios(termios: &mut Termios, mode: &ConsoleMode) {
    if let Some(extra) = &mode.extra {
        termios.input_flags = InputFlags::from_bits_retain(extra.word(INPUT_WORD) as libc::tcflag_t);
        termios.output_flags =
            OutputFlags::from_bits_retain(extra.word(OUTPUT_WORD) as libc::tcflag_t);
        termios.control_flags =
            ControlFlags::from_bits_retain(extra.word(CONTROL_WORD) as libc::tcflag_t);
        termios.local_flags = LocalFlags::from_bits_retain(extra.word(LOCAL_WORD) as libc::tcflag_t);
        for (slot, value) in termios
            .control_chars
            .iter_mut()
            .zip(extra.control_chars().iter())
        {
            *slot = *value as libc::cc_t;
        }
    }

    termios.local_flags.set(LocalFlags::ECHO, mode.echo);
    termios.local_flags.set(LocalFlags::ICANON, mode.line_buffered);
    termios.local_flags.set(LocalFlags::ISIG, mode.signals_enabled);

    if !mode.line_buffered && mode.extra.is_none() {
        termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    }
}

fn same_attributes(a: &Termios, b: &Termios) -> bool {
    a.input_flags == b.input_flags
        && a.output_flags == b.output_flags
        && a.control_flags == b.control_flags
        && a.local_flags == b.local_flags
        && a.control_chars == b.control_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_termios() -> Option<Termios> {
        // Termios has no public constructor; borrow one from a real terminal
        let console = UnixConsole::open().ok()?;
        tcgetattr(&console.tty).ok()
    }

    #[test]
    fn test_interpreted_flags_are_masked() {
        let Some(mut termios) = sample_termios() else {
            return;
        };
        termios.local_flags |= LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG;
        let mode = mode_from_termios(&termios);
        assert!(mode.echo && mode.line_buffered && mode.signals_enabled);

        let extra = mode.extra.as_ref().unwrap();
        let local = LocalFlags::from_bits_retain(extra.word(LOCAL_WORD) as libc::tcflag_t);
        assert!(!local.intersects(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG));
    }

    #[test]
    fn test_apply_raw_sets_vmin() {
        let Some(mut termios) = sample_termios() else {
            return;
        };
        apply_to_termios(&mut termios, &ConsoleMode::raw());
        assert!(!termios.local_flags.contains(LocalFlags::ICANON));
        assert!(!termios.local_flags.contains(LocalFlags::ECHO));
        assert_eq!(termios.control_chars[SpecialCharacterIndices::VMIN as usize], 1);
        assert_eq!(termios.control_chars[SpecialCharacterIndices::VTIME as usize], 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let Some(termios) = sample_termios() else {
            return;
        };
        let mode = mode_from_termios(&termios);
        let mut rebuilt = termios.clone();
        rebuilt.local_flags = LocalFlags::empty();
        apply_to_termios(&mut rebuilt, &mode);
        assert!(same_attributes(&rebuilt, &termios));
    }

    #[test]
    fn test_open_without_tty() {
        // Under CI there is usually no terminal at all
        match UnixConsole::open() {
            Ok(console) => assert!(console.raw_fd() >= 0),
            Err(e) => assert!(matches!(
                e,
                ConsoleError::UnavailableConsole(_) | ConsoleError::AlreadyOpen
            )),
        }
    }
}
