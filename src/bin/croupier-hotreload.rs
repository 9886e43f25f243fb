//! Croupier hot-reload client - demo game functions against a live Agent
//!
//! Registers a couple of demo game functions, connects to the Agent over its
//! Unix socket and keeps the session alive: health checks, auto-reconnect
//! and optional file-driven reloads run in the background.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (config from ~/.config/croupier/hotreload.toml if present)
//! croupier-hotreload run
//!
//! # Explicit config and Agent socket
//! croupier-hotreload run --config ./hotreload.toml --socket /run/croupier/agent.sock
//!
//! # Reload functions whenever files under ./functions change
//! croupier-hotreload run --watch ./functions
//!
//! # Validate a config file and print the effective settings
//! croupier-hotreload check-config ./hotreload.toml
//!
//! # Enable debug logging
//! RUST_LOG=croupier_sdk=debug croupier-hotreload run
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - SIGHUP: Reload the config file and restart background tasks

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use croupier_core::{handler_fn, FunctionHandler, HandlerError, HotReloadConfig};
use croupier_sdk::transport::DEFAULT_SOCKET_PATH;
use croupier_sdk::{ChangeEvent, ChangeKind, FunctionUpdate, HotReloadClient, UnixSocketTransport};
use serde_json::{json, Value};
use sysinfo::{Pid, System};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Period of the status log line.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Croupier hot-reload client
#[derive(Parser, Debug)]
#[command(name = "croupier-hotreload", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the Agent and serve the demo functions
    Run {
        /// Config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Agent socket path (overrides CROUPIER_AGENT_SOCKET)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Watch this directory and reload functions on change
        #[arg(short, long)]
        watch: Option<PathBuf>,
    },
    /// Validate a config file and print the effective settings
    CheckConfig {
        /// Config file (TOML)
        config: Option<PathBuf>,
    },
}

/// Returns the default config path, if the file exists.
fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("croupier").join("hotreload.toml");
    path.exists().then_some(path)
}

fn load_config(path: Option<&Path>) -> Result<HotReloadConfig> {
    match path {
        Some(path) => HotReloadConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HotReloadConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Run {
        config: None,
        socket: None,
        watch: None,
    });

    match command {
        Command::Run {
            config,
            socket,
            watch,
        } => {
            let config_path = config.or_else(default_config_path);
            let socket_path = socket
                .or_else(|| env::var_os("CROUPIER_AGENT_SOCKET").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
            run_client(config_path, socket_path, watch)
        }
        Command::CheckConfig { config } => {
            let path = config.or_else(default_config_path);
            let loaded = load_config(path.as_deref())?;
            match &path {
                Some(path) => println!("Config OK: {}", path.display()),
                None => println!("No config file found, using defaults"),
            }
            print!("{}", render_config(&loaded)?);
            Ok(())
        }
    }
}

/// Renders the effective settings as a TOML document.
fn render_config(config: &HotReloadConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render config as TOML")
}

/// Runs the client (async entry point).
#[tokio::main]
async fn run_client(
    config_path: Option<PathBuf>,
    socket_path: PathBuf,
    watch: Option<PathBuf>,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("croupier_hotreload=info".parse()?)
                .add_directive("croupier_sdk=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Croupier hot-reload client starting"
    );

    let mut config = load_config(config_path.as_deref())?;
    if let Some(dir) = watch {
        config.file_watching.enabled = true;
        config.file_watching.watch_dir = dir;
    }
    let shutdown_timeout = config.graceful_shutdown_timeout();

    let transport = UnixSocketTransport::new(&socket_path)
        .with_client_id(format!("croupier-hotreload-{}", process::id()));
    let client = Arc::new(
        HotReloadClient::new(config, transport)
            .context("Invalid configuration")?
            .with_policy(reload_from_file),
    );

    client
        .register("player.ban", "1.0.0", player_ban_handler())
        .await?;
    client
        .register("server.status", "1.0.0", server_status_handler())
        .await?;

    info!(socket = %socket_path.display(), "Connecting to Agent");
    if let Err(e) = client.connect().await {
        // The reconnect loop takes over from here.
        warn!(error = %e, "Initial connect failed");
    }
    client.start()?;

    let cancel = CancellationToken::new();
    let status_handle = spawn_status_log(Arc::clone(&client), cancel.clone());

    if let Err(e) = wait_for_signals(&client, config_path.as_deref()).await {
        error!(error = %e, "Error waiting for signals");
    }

    cancel.cancel();
    let _ = status_handle.await;

    info!("Shutting down");
    client
        .graceful_shutdown(Some(shutdown_timeout))
        .await
        .context("Graceful shutdown failed")?;

    info!("Croupier hot-reload client stopped");
    Ok(())
}

/// Handles SIGHUP reloads until SIGTERM or SIGINT arrives.
async fn wait_for_signals(client: &HotReloadClient, config_path: Option<&Path>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    reload_config_file(client, config_path).await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (client, config_path);
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

async fn reload_config_file(client: &HotReloadClient, config_path: Option<&Path>) {
    let Some(path) = config_path else {
        warn!("No config file in use, ignoring reload request");
        return;
    };

    let mut config = match HotReloadConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config reload skipped");
            return;
        }
    };
    // Keep a --watch override in effect across reloads.
    let current = client.config();
    if current.file_watching.enabled && !config.file_watching.enabled {
        config.file_watching = current.file_watching.clone();
    }

    if let Err(e) = client.reload_config(config).await {
        warn!(error = %e, "Config reload failed");
        return;
    }
    if let Err(e) = client.restart_background_tasks() {
        warn!(error = %e, "Failed to restart background tasks");
    }
}

fn spawn_status_log(
    client: Arc<HotReloadClient>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + STATUS_LOG_INTERVAL, STATUS_LOG_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let status = client.status();
                    info!(
                        state = %status.connection_state,
                        uptime = %status.uptime_display(),
                        reconnects = status.reconnect_count,
                        function_reloads = status.function_reloads,
                        config_reloads = status.config_reloads,
                        failed_reloads = status.failed_reloads,
                        "Client status"
                    );
                }
            }
        }
    })
}

// ============================================================================
// Demo Functions
// ============================================================================

/// Rebinds a demo function when its source file changes.
///
/// `functions/player.ban.rs` reloads `player.ban`; config files are left to
/// SIGHUP.
fn reload_from_file(event: &ChangeEvent) -> Option<FunctionUpdate> {
    if event.kind != ChangeKind::Code {
        return None;
    }
    let handler = match event.file_stem()? {
        "player.ban" => player_ban_handler(),
        "server.status" => server_status_handler(),
        _ => return None,
    };
    let id = event.file_stem()?;
    let version = format!("file-{}", Utc::now().format("%Y%m%d%H%M%S"));
    Some(FunctionUpdate::new(id, version, handler))
}

fn player_ban_handler() -> Arc<dyn FunctionHandler> {
    handler_fn(|payload: Value| {
        let player_id = payload
            .get("player_id")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidPayload("missing player_id".to_string()))?;
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");

        info!(player_id, reason, "Player banned");
        Ok(json!({
            "banned": player_id,
            "reason": reason,
            "at": Utc::now().to_rfc3339(),
        }))
    })
}

/// Reports memory and CPU usage of this process.
///
/// sysinfo needs a previous refresh as the CPU baseline, so the first call
/// reports 0% CPU.
fn server_status_handler() -> Arc<dyn FunctionHandler> {
    let system = Mutex::new(System::new());
    let pid = Pid::from_u32(process::id());

    handler_fn(move |_payload: Value| {
        let mut system = system
            .lock()
            .map_err(|_| HandlerError::Failed("system monitor poisoned".to_string()))?;
        system.refresh_all();

        let (memory_bytes, cpu_percent) = system
            .process(pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        Ok(json!({
            "pid": process::id(),
            "memory_mb": memory_bytes / 1024 / 1024,
            "cpu_percent": cpu_percent,
            "uptime_secs": System::uptime(),
        }))
    })
}
