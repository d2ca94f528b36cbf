//! LiveMark server - Main entry point.
//!
//! # Commands
//!
//! - `livemark-server serve`: index a directory and serve the change stream
//! - `livemark-server notify`: forward a tool hook payload from stdin
//!
//! # Configuration
//!
//! See [`livemark_server::config`] for environment variable configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use livemark_core::LiveMark;
use livemark_server::config::{json_logging_requested, server_url_from_env, Config};
use livemark_server::notifier::{notify, Notifier};
use livemark_server::routes::{create_router, AppState};

/// Default log filter for `serve`.
const SERVE_LOG_FILTER: &str = "info,tower_http=debug,axum::rejection=trace";

/// Default log filter for `notify`; it runs inside another tool's hook.
const NOTIFY_LOG_FILTER: &str = "warn";

/// LiveMark - live document index and change stream.
#[derive(Parser, Debug)]
#[command(name = "livemark-server")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    LIVEMARK_ROOT                     Directory to index (default: current directory)
    LIVEMARK_BOUNDARY_ROOT            Containment root (default: home directory)
    LIVEMARK_EXTENSIONS               Document extensions (default: md,markdown)
    LIVEMARK_HISTORY_SIZE             Replay buffer size (default: 50)
    LIVEMARK_SUBSCRIBER_BUFFER        Per-stream queue size (default: 32)
    LIVEMARK_CORRELATION_TIMEOUT_MS   Wait for a session record (default: 5000)
    LIVEMARK_CORRELATION_POLL_MS      Session record poll interval (default: 200)
    LIVEMARK_SESSION_LOG              Session log path, or 'off' (default: ~/.livemark/sessions.jsonl)
    LIVEMARK_SESSION_LOG_MAX          Records kept in the session log (default: 1000)
    LIVEMARK_PORT                     HTTP port on 127.0.0.1 (default: 3737)
    LIVEMARK_KEEPALIVE_SECS           SSE keep-alive interval (default: 15)
    LIVEMARK_SERVER_URL               Server used by 'notify' (default: http://127.0.0.1:3737)
    LIVEMARK_LOG_JSON                 Emit JSON logs when 'true'
    RUST_LOG                          Log level filter

EXAMPLES:
    # Serve the docs in the current project
    livemark-server serve --root ./docs

    # Forward a tool hook (reads the hook payload on stdin)
    livemark-server notify
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Index a directory and serve change notifications over HTTP.
    Serve {
        /// Directory to index; overrides LIVEMARK_ROOT.
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Port to listen on; overrides LIVEMARK_PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Forward a tool hook payload from stdin to a running server.
    ///
    /// Always exits successfully so the calling tool is never blocked.
    Notify,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { root, port } => {
            init_logging(json_logging_requested(), SERVE_LOG_FILTER);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_server(root, port))
        }
        Command::Notify => {
            init_logging(json_logging_requested(), NOTIFY_LOG_FILTER);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_notify());
            Ok(())
        }
    }
}

/// Runs the server until SIGINT or SIGTERM.
async fn run_server(root: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(root) = root {
        config.core.root_dir = if root.is_relative() {
            std::env::current_dir()
                .context("Failed to determine current directory")?
                .join(root)
        } else {
            root
        };
    }
    if let Some(port) = port {
        anyhow::ensure!(port > 0, "--port must be between 1 and 65535");
        config.port = port;
    }

    let livemark =
        LiveMark::from_config(&config.core).context("Failed to initialize core services")?;
    let root = livemark.start().await.with_context(|| {
        format!("Failed to index {}", config.core.root_dir.display())
    })?;

    info!(
        root = %root.display(),
        files = livemark.index.whitelist().len(),
        port = config.port,
        "LiveMark server starting"
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(livemark.clone(), config.keepalive, shutdown.clone());
    let app = create_router(state);

    let bind_addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!(address = %bind_addr, "Server listening");

    // Event streams never finish on their own; cancelling the token ends
    // them so graceful shutdown can complete.
    let stop_streams = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stop_streams.cancel();
        })
        .await
        .context("Server error")?;

    livemark.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Reads one hook payload from stdin and forwards it. Never fails.
async fn run_notify() {
    let mut input = Vec::new();
    if let Err(err) = tokio::io::stdin().read_to_end(&mut input).await {
        warn!(error = %err, "Failed to read hook payload from stdin");
        return;
    }

    let notifier = match Notifier::new(server_url_from_env()) {
        Ok(notifier) => notifier,
        Err(err) => {
            warn!(error = %err, "Failed to create HTTP client");
            return;
        }
    };

    let outcome = notify(&input, &notifier).await;
    debug!(?outcome, "Notify finished");
}

/// Initializes logging on stderr, as text or JSON.
///
/// `RUST_LOG` overrides `default_filter`.
fn init_logging(json: bool, default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM arrives.
///
/// If a handler cannot be installed, that signal is logged and ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
