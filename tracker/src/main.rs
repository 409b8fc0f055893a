//! DevBoost Tracker - editor activity tracker.
//!
//! # Commands
//!
//! - `devboost-tracker run`: Start the tracker daemon
//! - `devboost-tracker login`: Store an API token (GitHub flow by default)
//! - `devboost-tracker logout`: Clear the stored token and profile
//! - `devboost-tracker status`: Print today's status lines
//! - `devboost-tracker report`: Fetch the HTML time report
//! - `devboost-tracker changes`: Print today's uncommitted changes as JSON
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use devboost_tracker::api::ApiClient;
use devboost_tracker::config::Config;
use devboost_tracker::events::{EditorEvent, NoticeBus, TrackerNotice};
use devboost_tracker::login::{self, github_login_url, LoginListener};
use devboost_tracker::status::StatusLines;
use devboost_tracker::store::LocalStore;
use devboost_tracker::sync::SyncClient;
use devboost_tracker::tracker::Tracker;
use devboost_tracker::types::{CodeChangeSummary, TokenType};
use devboost_tracker::watcher::WorkspaceWatcher;

/// Time allowed for background tasks (the stdin reader) to stop.
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Capacity of the editor event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// DevBoost Tracker - editor activity tracker.
///
/// Tracks active time, keystrokes and uncommitted changes from editor
/// events and syncs them to the DevBoost service.
#[derive(Parser, Debug)]
#[command(name = "devboost-tracker")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    DEVBOOST_API_URL               API base URL (default: https://api.dev-boost.com)
    DEVBOOST_DATA_DIR              Local cache directory (default: ~/.devboost)
    DEVBOOST_WORKSPACES            Comma-separated workspace roots (default: current dir)
    DEVBOOST_SESSION_TIMEOUT_SECS  Activity session length (default: 60)
    DEVBOOST_DEBOUNCE_MS           Change debounce window (default: 50)
    DEVBOOST_REQUEST_TIMEOUT_SECS  HTTP timeout (default: 20)
    DEVBOOST_TRACK_UNCOMMITTED     Track uncommitted changes (default: true)
    DEVBOOST_EDITOR_NAME           Editor name reported to the API
    DEVBOOST_EDITOR_VERSION        Editor version reported to the API
    DEVBOOST_LOGIN_PORT            Login callback port (default: 3008)

EXAMPLES:
    # Log in with GitHub
    devboost-tracker login

    # Track events piped from an editor extension
    my-editor-bridge | devboost-tracker run --stdin

    # Track a workspace from the filesystem alone
    DEVBOOST_WORKSPACES=~/src/app devboost-tracker run --watch
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the tracker daemon.
    ///
    /// Reads JSON-line editor events from stdin (the default) and/or
    /// watches the workspace roots. Notices are written to stdout as JSON
    /// lines.
    Run {
        /// Read editor events from stdin.
        #[arg(long)]
        stdin: bool,

        /// Watch the workspace roots for file changes.
        #[arg(long)]
        watch: bool,
    },

    /// Store an API token.
    ///
    /// Without --token, starts the GitHub login flow and waits for the
    /// callback.
    Login {
        /// Token to store directly.
        #[arg(short, long)]
        token: Option<String>,

        /// Identity provider of --token.
        #[arg(long = "type", value_enum, default_value_t = TokenKind::Github)]
        token_type: TokenKind,
    },

    /// Clear the stored token and cached user profile.
    Logout,

    /// Print today's uncommitted change and time status lines.
    Status,

    /// Fetch the HTML time tracking report.
    Report {
        /// Write the report to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print today's uncommitted changes as JSON.
    Changes,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TokenKind {
    Pwd,
    Github,
    Google,
    Azure,
}

impl From<TokenKind> for TokenType {
    fn from(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Pwd => Self::Pwd,
            TokenKind::Github => Self::Github,
            TokenKind::Google => Self::Google,
            TokenKind::Azure => Self::Azure,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(
        api_url = %config.api_url,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    if let Command::Logout = cli.command {
        let store = LocalStore::open(config.data_dir.clone()).context("Failed to open local store")?;
        login::logout(&store).context("Failed to log out")?;
        println!("Logged out.");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(async {
        match cli.command {
            Command::Run { stdin, watch } => run_daemon(config, stdin || !watch, watch).await,
            Command::Login { token, token_type } => run_login(config, token, token_type.into()).await,
            Command::Status => run_status(config).await,
            Command::Report { output } => run_report(config, output).await,
            Command::Changes => run_changes(config).await,
            Command::Logout => Ok(()),
        }
    });

    // The stdin reader blocks on a runtime thread; don't wait on it forever
    runtime.shutdown_timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS));
    result
}

/// Services shared by every command.
struct Services {
    store: LocalStore,
    notices: NoticeBus,
    sync: SyncClient,
}

fn open_services(config: &Config) -> Result<Services> {
    let store = LocalStore::open(config.data_dir.clone()).context("Failed to open local store")?;
    let notices = NoticeBus::new();
    let api = ApiClient::new(config, store.clone(), notices.clone())
        .context("Failed to create API client")?;
    let sync = SyncClient::new(api, store.clone());
    Ok(Services {
        store,
        notices,
        sync,
    })
}

/// Runs the tracker daemon.
async fn run_daemon(config: Config, use_stdin: bool, watch: bool) -> Result<()> {
    info!(
        api_url = %config.api_url,
        workspaces = ?config.workspaces,
        stdin = use_stdin,
        watch,
        "Starting DevBoost Tracker"
    );

    let Services {
        store,
        notices,
        sync,
    } = open_services(&config)?;

    if store.auth_token().is_none() {
        warn!("No auth token stored, activity is cached locally only. Run 'devboost-tracker login'");
    }

    let printer = spawn_notice_printer(notices.subscribe());
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let tracker = Tracker::new(&config, store, sync, notices);

    let _watcher = if watch {
        let watcher = WorkspaceWatcher::new(&config.workspaces, tracker.ignore(), event_tx.clone())
            .context("Failed to start workspace watcher")?;
        info!(roots = watcher.roots().len(), "Watching workspaces");
        Some(watcher)
    } else {
        None
    };

    if use_stdin {
        tokio::spawn(read_stdin_events(event_tx.clone()));
    }
    drop(event_tx);

    tracker.run(event_rx, wait_for_shutdown()).await;

    // The tracker owned the last notice senders, so the printer drains and exits
    if let Err(e) = printer.await {
        warn!(error = %e, "Notice printer task failed");
    }

    info!("DevBoost Tracker stopped");
    Ok(())
}

/// Reads JSON-line editor events from stdin until EOF.
///
/// Malformed lines are logged and skipped.
async fn read_stdin_events(events: mpsc::Sender<EditorEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<EditorEvent>(line) {
                    Ok(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed event line"),
                }
            }
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

/// Writes every notice to stdout as one JSON line.
fn spawn_notice_printer(mut notices: broadcast::Receiver<TrackerNotice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    let mut line = match serde_json::to_string(&notice) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize notice");
                            continue;
                        }
                    };
                    line.push('\n');
                    if let Err(e) = stdout.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to write notice");
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notice printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Stores a token, running the GitHub callback flow when none is given.
async fn run_login(config: Config, token: Option<String>, token_type: TokenType) -> Result<()> {
    let Services { store, sync, .. } = open_services(&config)?;

    if store.auth_token().is_some() {
        println!("A token is already stored; logging in again replaces it.");
    }

    let (token, token_type) = match token {
        Some(token) => (token, token_type),
        None => {
            let listener = LoginListener::bind(config.login_port)
                .await
                .context("Failed to start the login callback listener")?;
            println!(
                "Open {} in your browser to log in with GitHub.",
                github_login_url(&config.api_url)
            );
            let token = tokio::select! {
                token = listener.wait_for_token() => token.context("Login failed")?,
                () = wait_for_shutdown() => bail!("Login cancelled"),
            };
            (token, TokenType::Github)
        }
    };

    match login::complete_login(&store, &sync, token, token_type).await? {
        Some(user) => {
            let name = user
                .display_name
                .or(user.email)
                .unwrap_or_else(|| user.id.to_string());
            println!("Logged in as {name}.");
        }
        None => println!("Token stored, but the user profile could not be fetched."),
    }
    Ok(())
}

async fn run_status(config: Config) -> Result<()> {
    let Services { sync, .. } = open_services(&config)?;

    let (totals, records) = futures::join!(
        sync.time_tracking_today(),
        sync.uncommitted_changes_today()
    );
    let summary = if config.track_uncommitted {
        CodeChangeSummary::from_records(&records)
    } else {
        CodeChangeSummary::default()
    };

    let lines = StatusLines::new(summary, &totals);
    if config.track_uncommitted {
        println!("{}", lines.changes());
    }
    println!("{}", lines.time());
    Ok(())
}

async fn run_report(config: Config, output: Option<PathBuf>) -> Result<()> {
    let Services { sync, .. } = open_services(&config)?;

    let html = sync
        .report_html()
        .await
        .context("Failed to fetch the time tracking report")?;

    match output {
        Some(path) => {
            fs::write(&path, html)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{html}"),
    }
    Ok(())
}

async fn run_changes(config: Config) -> Result<()> {
    let Services { sync, .. } = open_services(&config)?;

    let records = sync.uncommitted_changes_today().await;
    let json = serde_json::to_string_pretty(&records).context("Failed to serialize changes")?;
    println!("{json}");
    Ok(())
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr; stdout carries the notice protocol.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
