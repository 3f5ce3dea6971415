//! Console Probe - interactive event dump
//!
//! Opens a session on the controlling terminal and prints every event it
//! produces. Press `q` to quit; a second Ctrl-C also quits.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mochi_console::{
    ConsoleMode, ConsoleResult, ConsoleSession, InputEvent, Notification, NotificationKinds,
    SessionConfig,
};

#[derive(Parser, Debug)]
#[command(name = "console-probe")]
#[command(version)]
#[command(about = "Print console input and notifications as they arrive", long_about = None)]
struct CliArgs {
    /// Path to a TOML session config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// No echo, no line editing, no signal keys
    #[arg(long, conflicts_with = "cbreak")]
    raw: bool,

    /// Character-at-a-time input, signal keys still work (default)
    #[arg(long)]
    cbreak: bool,

    /// Keep echo on
    #[arg(long)]
    echo: bool,

    /// Wait step in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Do not hook resize notifications
    #[arg(long)]
    no_resize: bool,

    /// One JSON object per event
    #[arg(long)]
    json: bool,
}

impl CliArgs {
    fn mode(&self) -> ConsoleMode {
        let base = if self.raw && !self.cbreak {
            ConsoleMode::raw()
        } else {
            ConsoleMode::cbreak()
        };
        base.with_echo(self.echo)
    }

    fn session_config(&self) -> ConsoleResult<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::default(),
        };
        config.apply_env_overrides()?;
        if let Some(ms) = self.poll_ms {
            config.poll_timeout_ms = ms;
        }
        if self.no_resize {
            config.notifications = NotificationKinds {
                resize: false,
                ..config.notifications
            };
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("console-probe: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(args: &CliArgs) -> ConsoleResult<()> {
    let config = args.session_config()?;
    let mut session = ConsoleSession::open_configured(args.mode(), config)?;
    tracing::info!(
        mode = ?session.mode()?,
        size = ?session.dimensions()?,
        "Console probe started"
    );
    if !args.json {
        session.write_str("press q to quit\r\n")?;
    }

    let mut interrupts = 0u32;
    let mut stdout = io::stdout();
    for event in session.events()? {
        let event = match event {
            Ok(event) => event,
            Err(e) if e.is_transient() => {
                tracing::warn!("Read failed: {}", e);
                continue;
            },
            Err(e) => return Err(e),
        };

        write!(stdout, "{}\r\n", describe(&event, args.json))?;
        stdout.flush()?;

        let quit = match &event {
            InputEvent::Bytes(bytes) => bytes.contains(&b'q'),
            InputEvent::Notification(Notification::Interrupt) => {
                interrupts += 1;
                interrupts >= 2
            },
            InputEvent::Notification(Notification::Eof) => true,
            InputEvent::Notification(_) => false,
        };
        if quit {
            break;
        }
    }
    session.close();
    Ok(())
}

fn describe(event: &InputEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }
    match event {
        InputEvent::Bytes(bytes) => {
            format!("bytes {:02x?} {:?}", bytes, String::from_utf8_lossy(bytes))
        },
        InputEvent::Notification(Notification::Resize(size)) => {
            format!("resize {}x{}", size.columns, size.rows)
        },
        InputEvent::Notification(n) => n.name().to_string(),
    }
}
