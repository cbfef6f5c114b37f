//! pscan - headless passive scanner
//!
//! Replays captured traffic through the passive scan engine and prints
//! alerts as JSON lines, optionally exposing the management API on a
//! control socket.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pscan::api::{ControlServer, ManagementApi};
use pscan::scanner::{rules, Alert, AlertSink, MessageRef, PassiveScanEngine};
use pscan::traffic::{har, MessageHistory};
use pscan::{Config, PscanError};

/// Passive security scanner for captured HTTP and WebSocket traffic
#[derive(Parser, Debug)]
#[command(name = "pscan")]
#[command(author, version, about = "Passive security scanner", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// HAR file to replay through the scanner
    #[arg(long)]
    har: Option<PathBuf>,

    /// Control socket port (overrides config, 0 to disable)
    #[arg(long, env = "PSCAN_API_PORT")]
    api_port: Option<u16>,

    /// Enable every built-in rule regardless of persisted state
    #[arg(long)]
    enable_all_rules: bool,

    /// Number of scan worker threads (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds to wait for the queue to drain after a replay
    #[arg(long, default_value = "60")]
    drain_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PSCAN_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "PSCAN_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "PSCAN_LOG_JSON")]
    log_json: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

/// Writes each alert and tag to stdout as one JSON line
struct JsonLinesSink {
    out: Mutex<std::io::Stdout>,
}

impl JsonLinesSink {
    fn new() -> Self {
        Self {
            out: Mutex::new(std::io::stdout()),
        }
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "Failed to write scan output");
        }
    }
}

impl AlertSink for JsonLinesSink {
    fn alert_found(&self, alert: Alert) {
        match serde_json::to_string(&alert) {
            Ok(line) => self.write_line(&line),
            Err(e) => tracing::warn!(rule_id = alert.rule_id, error = %e, "Failed to encode alert"),
        }
    }

    fn tag_added(&self, message: &MessageRef, tag: &str) {
        let line = serde_json::json!({ "tag": tag, "message": message });
        self.write_line(&line.to_string());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match start(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Ok(typed) = PscanError::recover(err) {
                eprintln!("{}", typed.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

async fn start(cli: Cli) -> Result<()> {
    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting pscan");

    let (config, config_path) = load_config(&cli)?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    run(cli, config, config_path).await
}

/// Initialize the logging system
///
/// Logs go to stderr or a rolling file; stdout carries alerts only.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log level")?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let path = Path::new(log_path);
        let file_appender = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                RollingFileAppender::new(Rotation::DAILY, dir, name)
            }
            _ => {
                let log_dir = Config::data_dir()
                    .map(|d| d.join("logs"))
                    .unwrap_or_else(|_| PathBuf::from("."));
                std::fs::create_dir_all(&log_dir)
                    .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
                RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
            }
        };

        if cli.log_json {
            subscriber
                .with(fmt::layer().json().with_writer(file_appender).with_ansi(false))
                .init();
        } else {
            subscriber
                .with(fmt::layer().with_writer(file_appender).with_ansi(false))
                .init();
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}

/// Load configuration and apply CLI overrides
///
/// Returns the path changes are persisted to, if one could be determined.
fn load_config(cli: &Cli) -> Result<(Config, Option<PathBuf>)> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = cli.api_port {
        config.api.port = port;
    }
    if let Some(workers) = cli.workers {
        config.scanner.workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => Config::default_config_path().ok(),
    };
    Ok((config, path))
}

fn generate_default_config() -> Result<()> {
    let toml = toml::to_string_pretty(&Config::default()).context("Failed to serialize configuration")?;
    println!("{}", toml);
    Ok(())
}

async fn run(cli: Cli, config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let history = Arc::new(MessageHistory::new(config.scanner.history_size));
    let engine = PassiveScanEngine::builder(history.clone(), Arc::new(JsonLinesSink::new()))
        .name("main")
        .config(&config.scanner)
        .scope(config.scope.clone())
        .build();

    for rule in rules::default_rules() {
        engine.add_rule(rule);
    }
    engine.apply_rule_settings(&config.rule_settings());
    if cli.enable_all_rules {
        engine.registry().set_all_enabled(true);
    }
    tracing::info!(
        registered = engine.registry().len(),
        enabled = engine.registry().enabled_rules().len(),
        "Rules loaded"
    );

    engine.start().context("Failed to start scan workers")?;
    let engine = Arc::new(engine);

    let mut api = ManagementApi::new(engine.clone(), config.clone());
    if let Some(path) = config_path {
        api = api.with_config_path(path);
    }
    let api = Arc::new(api);

    let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel();
    let server = if config.api.port > 0 {
        let server = ControlServer::bind(&config.api.listen_addr, config.api.port, api.clone()).await?;
        Some(tokio::spawn(server.serve(server_shutdown_rx)))
    } else {
        None
    };

    if let Some(har_path) = &cli.har {
        replay_har(&engine, &history, har_path)?;

        let drain_engine = engine.clone();
        let timeout = Duration::from_secs(cli.drain_timeout);
        let drained = tokio::task::spawn_blocking(move || drain_engine.wait_until_drained(timeout))
            .await
            .context("Drain task failed")?;
        if drained {
            tracing::info!(stats = ?engine.stats().messages(), "Replay scanned");
        } else {
            tracing::warn!(queued = engine.queue_depth(), "Timed out waiting for the scan queue to drain");
        }
    }

    // Without a control socket there is nothing left to serve after a replay
    if server.is_some() || cli.har.is_none() {
        wait_for_shutdown_signal().await;
    }

    let _ = server_shutdown_tx.send(());
    if let Some(server) = server {
        if let Err(e) = server.await {
            tracing::warn!("Control server task failed: {}", e);
        }
    }

    let stopping = engine.clone();
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("Shutdown task failed")?;

    for stats in engine.stats().rules() {
        tracing::debug!(
            rule = %stats.rule,
            invocations = stats.invocations,
            failures = stats.failures,
            total_ms = stats.total_ms,
            alerts = stats.alerts,
            "Rule statistics"
        );
    }
    tracing::info!("pscan shutting down gracefully");
    Ok(())
}

/// Feed every exchange of a HAR file through the interception entry point
fn replay_har(engine: &PassiveScanEngine, history: &MessageHistory, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read HAR file {:?}", path))?;
    let exchanges = har::import(&content).with_context(|| format!("Failed to import HAR file {:?}", path))?;

    let total = exchanges.len();
    let mut queued = 0;
    for exchange in exchanges {
        let message = history.record_http(0, exchange);
        if engine.on_message(message) {
            queued += 1;
        }
    }

    tracing::info!(total, queued, "Replayed HAR entries");
    Ok(())
}

/// Wait for SIGINT/SIGTERM (Ctrl+C elsewhere)
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to register signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating shutdown"),
            Err(e) => tracing::error!("Failed to register Ctrl+C handler: {}", e),
        }
    }
}
