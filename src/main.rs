//! pollboard: a live terminal dashboard for the analytics services.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐ FeedUpdate ┌──────────┐  draw()  ┌──────────┐
//! │  poll.rs │ ─────────► │  app.rs  │ ───────► │  ui.rs   │
//! │ (tokio)  │  (channel) │ (state)  │          │ (render) │
//! └──────────┘            └──────────┘          └──────────┘
//!      ▲                       ▲
//!      │ Source                │ handle_key_event()
//! ┌──────────┐            ┌──────────┐
//! │ feeds.rs │            │ input.rs │
//! └──────────┘            └──────────┘
//! ```
//!
//! * **`config`**: startup settings (TOML file, flags, environment).
//! * **`feeds`**: turns the config into one `Source` per panel.
//! * **`source/`**: `Source`, `Endpoint`, `Record` and normalization.
//! * **`fetch`**: the `Fetch` trait and its HTTP implementation.
//! * **`poll`**: one ticker task per source; delivers ordered,
//!   cancellation-safe `PollResult`s.
//! * **`app`**: owns all dashboard state (panels, focus, status line).
//! * **`ui`**: pure rendering: reads `App` state and draws widgets.
//! * **`input`**: maps key events to `App` mutations.
//! * **`main`**: wires everything together: parse args, set up logging and
//!   the terminal, start the pollers, and run the event loop.
//!
//! Logs go to a file (default `/tmp/pollboard.log`) so they never corrupt
//! the terminal UI.

mod app;
mod config;
mod error;
mod feeds;
mod fetch;
mod input;
mod poll;
mod source;
mod ui;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app::{App, FeedUpdate, Panel};
use config::DashboardConfig;
use fetch::{Fetch, HttpFetcher};
use poll::PollHandle;

/// Terminal dashboard polling the analytics services.
#[derive(Parser, Debug)]
#[command(name = "pollboard", version, about)]
struct Cli {
    /// Base URL of the deployment (e.g. http://analytics.internal)
    #[arg(long, env = "POLLBOARD_HOST")]
    host: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "POLLBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log file path (defaults to /tmp/pollboard.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ---------------------------------------------------------------------------
// RAII terminal guard
// ---------------------------------------------------------------------------

/// Manages terminal raw-mode and alternate-screen lifetime via [`Drop`].
///
/// Constructing this struct enters raw mode + alternate screen.  When the
/// value is dropped (normally or during stack unwinding) it restores the
/// terminal.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Install a panic hook that restores the terminal before printing the
/// panic message.
///
/// Only a panic on the calling (UI) thread tears the terminal down.  Tokio
/// contains panics in poll tasks and the UI keeps running, so those are
/// logged instead of printed over the dashboard.
fn install_panic_hook() {
    let ui_thread = thread::current().id();
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if on_thread(ui_thread) {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            original_hook(info);
        } else {
            error!(panic = %info, "panic in background task");
        }
    }));
}

fn on_thread(id: ThreadId) -> bool {
    thread::current().id() == id
}

/// File-based tracing.  Logging to stdout/stderr would corrupt the TUI.
/// The returned guard must live until exit so buffered lines are flushed.
fn setup_tracing(log_file: &Path, verbose: u8) -> WorkerGuard {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pollboard={log_level}")));

    let log_dir = log_file.parent().unwrap_or(Path::new("/tmp"));
    let log_filename = log_file
        .file_name()
        .unwrap_or(std::ffi::OsStr::new("pollboard.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    guard
}

/// Resolve configuration once: file (if any), then flag/env overrides.
fn resolve_config(cli: &Cli) -> Result<DashboardConfig> {
    let mut config =
        DashboardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(log_file) = &cli.log_file {
        config.log_file = log_file.clone();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    // -- configuration (fails before the terminal is touched) ----------------
    let config = resolve_config(&cli)?;
    let feeds = feeds::build(&config).context("invalid configuration")?;

    let _log_guard = setup_tracing(&config.log_file, cli.verbose);
    info!(host = %config.host, feeds = feeds.len(), "starting dashboard");

    install_panic_hook();

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let result = {
        let _enter = runtime.enter();

        // -- start one poller per feed ---------------------------------------
        let (tx, mut rx) = mpsc::unbounded_channel::<FeedUpdate>();
        let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new());
        let panels: Vec<Panel> = feeds.iter().map(Panel::new).collect();

        let handles: Vec<PollHandle> = feeds
            .into_iter()
            .enumerate()
            .map(|(panel, feed)| {
                let tx = tx.clone();
                poll::start(feed.source, Arc::clone(&fetcher), move |result| {
                    // The receiver only goes away on shutdown.
                    let _ = tx.send(FeedUpdate { panel, result });
                })
            })
            .collect();

        let outcome = run_ui(App::new(panels), &mut rx);

        for handle in handles {
            debug!(source = handle.id(), "stopping poller");
            handle.stop();
        }
        outcome
    };

    runtime.shutdown_timeout(Duration::from_millis(500));
    info!("dashboard stopped");
    result
}

/// The main event loop.  Runs at ~10 fps (100 ms tick).  Each iteration:
///   1. Drain any updates from the pollers.
///   2. Render the UI.
///   3. Poll for keyboard input (non-blocking, up to tick_rate).
fn run_ui(mut app: App, rx: &mut mpsc::UnboundedReceiver<FeedUpdate>) -> Result<()> {
    // -- terminal setup (Drop restores on exit or panic) ---------------------
    let mut guard = TerminalGuard::new()?;
    let tick_rate = Duration::from_millis(100);

    loop {
        while let Ok(update) = rx.try_recv() {
            app.apply(update);
        }

        guard.terminal.draw(|f| ui::draw(&app, f))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                input::handle_key_event(&mut app, key);
            }
        }

        if app.quit {
            break;
        }
    }

    // `guard` is dropped here, restoring the terminal.
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
