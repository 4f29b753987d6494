mod log_view;
mod state;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fleet_core::{topics, ErrorPayload};
use fleet_stream::{SubscriptionRegistry, Transport, TransportConfig, WsTransport};
use futures_util::StreamExt;
use log_view::{format_plain, LogView};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_LOG_DIR: &str = ".fleet/logs";
const LOG_FILE_NAME: &str = "fleet-console.log";

#[derive(Parser, Debug)]
#[command(name = "fleet-console", about = "Follow task logs streamed from the fleet server")]
struct Args {
    #[arg(long, global = true, default_value = "")]
    server_url: String,
    /// Seconds to wait for the socket handshake.
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout: u64,
    #[arg(long, global = true, default_value = "")]
    log_dir: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Interactive log viewer for one task.
    Watch { task_id: String },
    /// Print a task's log lines to stdout until interrupted.
    Tail { task_id: String },
}

#[derive(Debug)]
struct RuntimeConfig {
    transport: TransportConfig,
    log_dir: String,
    log_stderr: bool,
    command: Command,
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

struct MultiWriter {
    file: Option<Arc<StdMutex<std::fs::File>>>,
    stderr_enabled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;
    let _log_guard = init_logging(&config);
    info!(
        "console_start: server_url={} command={:?}",
        config.transport.url, config.command
    );

    let transport = Arc::new(WsTransport::new(
        config.transport.clone(),
        SubscriptionRegistry::global(),
    ));
    let result = match &config.command {
        Command::Watch { task_id } => run_watch(Arc::clone(&transport), task_id).await,
        Command::Tail { task_id } => run_tail(Arc::clone(&transport), task_id).await,
    };
    transport.shutdown();
    if let Err(err) = &result {
        warn!("console_exit_error: {err:#}");
    }
    result
}

fn load_config(args: Args) -> Result<RuntimeConfig> {
    let server_url = resolve_server_url(&args.server_url);
    let mut transport = TransportConfig::from_server_url(&server_url)
        .with_context(|| format!("invalid server url {server_url}"))?;
    transport.connect_timeout = Duration::from_secs(args.connect_timeout.max(1));
    Ok(RuntimeConfig {
        transport,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stderr: resolve_log_stderr(),
        command: args.command,
    })
}

fn resolve_server_url(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = env::var("FLEET_SERVER_URL") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_SERVER_URL.to_string()
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("FLEET_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_LOG_DIR.to_string()
}

fn resolve_log_stderr() -> bool {
    env::var("FLEET_LOG_STDERR")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(false)
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

async fn run_watch(transport: Arc<WsTransport>, task_id: &str) -> Result<()> {
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let error_listener = transport.add_listener(topics::ERROR, move |envelope| {
        if let Some(payload) = ErrorPayload::from_envelope(envelope) {
            let _ = error_tx.send(payload);
        }
        Ok(())
    });

    let mut app = state::App::new(LogView::new(Arc::clone(&transport)));
    app.view.bind(task_id);

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &mut error_rx).await;
    restore_terminal(&mut terminal)?;

    app.view.unbind();
    transport.remove_listener(&error_listener);
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut state::App<WsTransport>,
    error_rx: &mut mpsc::UnboundedReceiver<ErrorPayload>,
) -> Result<()> {
    let mut events = EventStream::new();
    // Keeps the local-time column and indicator fresh while the stream is idle.
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        terminal.draw(|f| ui::render(f, app))?;
        if app.should_quit() {
            return Ok(());
        }

        tokio::select! {
            _ = app.view.changed() => {}
            Some(payload) = error_rx.recv() => app.note_server_error(payload),
            maybe_event = events.next() => match maybe_event {
                Some(Ok(event)) => app.handle_event(event),
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(()),
            },
            _ = tick.tick() => {}
        }
    }
}

async fn run_tail(transport: Arc<WsTransport>, task_id: &str) -> Result<()> {
    let mut view = LogView::new(transport);
    view.bind(task_id);

    let mut stdout = io::stdout();
    let mut printed = 0usize;
    let mut announced = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let indicator = view.indicator();
        if announced != Some(indicator) {
            eprintln!("[{}] {}", indicator.label(), task_id);
            announced = Some(indicator);
        }
        for entry in view.entries_since(printed) {
            writeln!(stdout, "{}", format_plain(&entry))?;
            printed = printed.max(entry.seq as usize);
        }
        stdout.flush()?;

        tokio::select! {
            _ = view.changed() => {}
            _ = &mut shutdown => break,
        }
    }

    view.unbind();
    Ok(())
}

fn init_logging(config: &RuntimeConfig) -> Option<LogGuard> {
    let level = env::var("FLEET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    // The TUI owns the terminal, so stderr logging only applies to tail.
    let stderr_enabled = config.log_stderr && matches!(config.command, Command::Tail { .. });
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stderr_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}

impl MultiWriter {
    fn new(file: Option<Arc<StdMutex<std::fs::File>>>, stderr_enabled: bool) -> Self {
        Self {
            file,
            stderr_enabled,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        assert_eq!(
            resolve_server_url(" http://fleet.local:9000 "),
            "http://fleet.local:9000"
        );
        assert_eq!(resolve_log_dir("/tmp/fleet"), "/tmp/fleet");
    }

    #[test]
    fn bool_env_values() {
        assert_eq!(parse_bool_env("YES"), Some(true));
        assert_eq!(parse_bool_env(" 0 "), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let args = Args::parse_from([
            "fleet-console",
            "tail",
            "t42",
            "--server-url",
            "http://127.0.0.1:9000",
            "--connect-timeout",
            "3",
        ]);
        let config = load_config(args).expect("config");
        assert_eq!(config.transport.url.as_str(), "ws://127.0.0.1:9000/ws");
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(3));
        assert!(matches!(config.command, Command::Tail { ref task_id } if task_id == "t42"));
    }

    #[test]
    fn rejects_unusable_server_url() {
        let args = Args::parse_from(["fleet-console", "--server-url", "::nope::", "watch", "t1"]);
        assert!(load_config(args).is_err());
    }
}
