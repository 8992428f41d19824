//! Code relay server.
//!
//! Run with: cargo run -p coderelay-server -- --root ./workspace
//!
//! Then open http://localhost:5000 in your browser.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use coderelay_process::{OutputMode, RunnerConfig};
use coderelay_session::SessionConfig;
use coderelay_transport::{AppState, router};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "coderelay", about = "Edit and run files in a browser", version, long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "CODERELAY_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Base for relative working directories and downloads. Defaults to the
    /// current directory.
    #[arg(long, env = "CODERELAY_ROOT")]
    root: Option<PathBuf>,

    /// File pushed to the client when a working directory containing it is opened.
    #[arg(long, env = "CODERELAY_DEFAULT_FILE")]
    default_file: Option<String>,

    /// Milliseconds between directory listings.
    #[arg(long, env = "CODERELAY_REPORT_INTERVAL_MS", default_value_t = 3000)]
    report_interval_ms: u64,

    /// How child output is captured (terminal or pipe).
    #[arg(long, env = "CODERELAY_OUTPUT_MODE", default_value = "terminal")]
    output_mode: OutputMode,

    /// Shell used to launch files.
    #[arg(long, env = "CODERELAY_SHELL", default_value = "/bin/sh")]
    shell: String,

    /// Log output format (text or json).
    #[arg(long, env = "CODERELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        let root = root
            .canonicalize()
            .with_context(|| format!("invalid root directory {}", root.display()))?;
        anyhow::ensure!(root.is_dir(), "root {} is not a directory", root.display());

        Ok(SessionConfig {
            root,
            report_interval: Duration::from_millis(self.report_interval_ms.max(1)),
            default_file: self.default_file.clone().filter(|f| !f.is_empty()),
            runner: RunnerConfig {
                shell: self.shell.clone(),
                output_mode: self.output_mode,
                ..RunnerConfig::default()
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment from .env must be in place before flags are parsed
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    let config = cli.session_config()?;
    tracing::info!(
        root = %config.root.display(),
        output_mode = %config.runner.output_mode,
        "Configuration loaded"
    );

    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    tracing::info!("Server listening on http://{}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with((!json).then(|| fmt::layer()))
        .with(json.then(|| fmt::layer().json()))
        .try_init()
        .context("failed to init tracing")
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler, using Ctrl-C only: {e}");
            let _ = ctrl_c.await;
        }
    }
    tracing::info!("Shutdown requested");
}
