//! vnc-viewer entry point.
//!
//! ```text
//! vnc-viewer host[:port]           Connect, then read commands on stdin
//! vnc-viewer --config <path>       Use custom config TOML
//! vnc-viewer --gen-config          Dump default config and exit
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vnc_core::{Session, SessionState, keysym};
use vnc_viewer::commands::{self, Command, HELP};
use vnc_viewer::config::ViewerConfig;
use vnc_viewer::console::{self, Connect, Event, Input, LineRelay};
use vnc_viewer::observer::ConsoleObserver;
use vnc_viewer::rfb::RfbEngine;

type ViewerSession = Session<RfbEngine>;

/// How often the command loop checks whether the session dropped.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vnc-viewer", about = "Headless VNC viewer")]
struct Cli {
    /// Server to connect to: host, host:port or host:display.
    server: Option<String>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vnc-viewer.toml")]
    config: PathBuf,

    /// Do not forward keyboard, pointer or clipboard input.
    #[arg(long)]
    view_only: bool,

    /// Never prompt for a password; fail authentication instead.
    #[arg(long)]
    no_prompt: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(target) = &cli.server {
        config.server.apply_target(target)?;
    }
    if cli.view_only {
        config.input.view_only = true;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    info!("vnc-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Stdin ────────────────────────────────────────────────

    let (tx, inbox) = mpsc::channel::<Event>();
    let relay = Arc::new(LineRelay::new());
    relay.spawn(BufReader::new(io::stdin()), tx.clone())?;

    // ── 2. Build the session ────────────────────────────────────

    let prompt = (!cli.no_prompt).then(|| Arc::clone(&relay));
    let observer = Arc::new(ConsoleObserver::new(&config.server, prompt));
    let connect_timeout = config.connect_timeout();
    let session = Session::new(config.session_config(), observer, move |events| {
        Ok(RfbEngine::new(events, connect_timeout))
    })?;
    session.set_input_disabled(config.input.view_only);
    session.set_suppress_incoming_pointer_moves(config.input.suppress_server_pointer_moves);

    // ── 3. Connect ──────────────────────────────────────────────

    let Connect {
        result: connected,
        stop,
    } = console::connect_watching_input(
        &session,
        &config.server.host,
        config.server.port,
        tx,
        &inbox,
    )?;

    if let Err(e) = connected {
        session.cleanup()?;
        if e.is_cancellation() {
            info!("connection cancelled");
            return Ok(());
        }
        error!("{e}");
        return Err(e.into());
    }
    if !stop {
        if let Some(info) = session.connection_info() {
            println!(
                "connected to '{}' ({}x{}); type 'help' for commands",
                info.desktop_name, info.width, info.height
            );
        }
    }

    // ── 4. Command loop ─────────────────────────────────────────

    while !stop && session.state() == SessionState::Connected {
        let line = match inbox.recv_timeout(POLL_INTERVAL) {
            Ok(Event::Input(Input::Line(line))) => line,
            Ok(Event::Input(Input::Closed)) => break,
            Ok(Event::Connected(_)) | Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match commands::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => execute(&session, cmd),
            Ok(None) => {}
            Err(msg) => eprintln!("{msg}"),
        }
    }

    // ── 5. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    let last_error = session.last_error();
    session.cleanup()?;
    if let Some(reason) = last_error {
        return Err(format!("disconnected: {reason}").into());
    }
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────

fn execute(session: &ViewerSession, cmd: Command) {
    match cmd {
        Command::Key(chord) => {
            for sym in &chord {
                session.send_key(*sym, true);
            }
            for sym in chord.iter().rev() {
                session.send_key(*sym, false);
            }
        }
        Command::Type(text) => {
            for c in text.chars() {
                let sym = keysym::from_char(c);
                session.send_key(sym, true);
                session.send_key(sym, false);
            }
        }
        Command::Move(x, y) => {
            session.send_pointer(x, y);
        }
        Command::Click { button, at } => {
            let (x, y) = at.unwrap_or_else(|| session.pointer());
            session.send_pointer_button(button, true, x, y);
            session.send_pointer_button(button, false, x, y);
        }
        Command::Scroll { wheel, at } => {
            let (x, y) = at.unwrap_or_else(|| session.pointer());
            session.send_scroll(wheel, x, y);
        }
        Command::Clip(text) => {
            if !session.send_clipboard(&text) {
                println!("clipboard not sent");
            }
        }
        Command::Pause => {
            session.set_framebuffer_updates_paused(true);
        }
        Command::Resume => {
            session.set_framebuffer_updates_paused(false);
        }
        Command::Refresh => {
            session.refresh_framebuffer();
        }
        Command::Info => print_info(session),
        Command::Save(path) => save_frame(session, &path),
        Command::ViewOnly(value) => {
            let disabled = value.unwrap_or(!session.is_input_disabled());
            session.set_input_disabled(disabled);
            println!("view-only {}", if disabled { "on" } else { "off" });
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn print_info(session: &ViewerSession) {
    println!("state:      {}", session.state());
    match session.connection_info() {
        Some(info) => {
            println!("desktop:    {}", info.desktop_name);
            println!("size:       {}x{}", info.width, info.height);
            println!("encrypted:  {}", info.encrypted);
        }
        None => println!("desktop:    (busy)"),
    }
    let (x, y) = session.pointer();
    println!("pointer:    {x},{y} buttons={:?}", session.pointer_buttons());
    println!("view-only:  {}", session.is_input_disabled());
    println!("paused:     {}", session.is_framebuffer_updates_paused());
}

fn save_frame(session: &ViewerSession, path: &Path) {
    let Some(frame) = session.try_with_engine(RfbEngine::frame_snapshot).flatten() else {
        println!("framebuffer busy, try again");
        return;
    };
    let result = File::create(path).and_then(|file| frame.write_ppm(BufWriter::new(file)));
    match result {
        Ok(()) => println!(
            "saved {}x{} to {}",
            frame.width(),
            frame.height(),
            path.display()
        ),
        Err(e) => warn!("could not save {}: {e}", path.display()),
    }
}
