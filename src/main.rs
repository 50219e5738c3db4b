#![forbid(unsafe_code)]

//! `agent-bridge` daemon binary.
//!
//! Bootstraps configuration, the session registry, one backend agent
//! session per registered channel, the auto-recovery monitor, and the IPC
//! server for `agent-bridge-ctl`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::config::GlobalConfig;
use agent_bridge::ipc::server::spawn_ipc_server;
use agent_bridge::multiplexer::tmux::TmuxMultiplexer;
use agent_bridge::notify::{self, notify_best_effort, Notifier};
use agent_bridge::orchestrator::auto_recovery::{AutoRecoveryController, MonitorSettings};
use agent_bridge::orchestrator::process_controller::{
    ControllerSettings, ProcessSessionController,
};
use agent_bridge::orchestrator::recovery_strategy::RecoveryStrategy;
use agent_bridge::persistence::history::RecoveryHistory;
use agent_bridge::registry::SessionRegistry;
use agent_bridge::router::MessageRouter;
use agent_bridge::state::AppState;
use agent_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Chat to CLI agent session bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(dir) = args.data_dir {
        std::fs::create_dir_all(&dir)
            .map_err(|err| AppError::Config(format!("invalid data dir override: {err}")))?;
        config.data_dir = dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid data dir override: {err}")))?;
    }

    config.load_credentials().await?;
    let config = Arc::new(config);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Core components ─────────────────────────────────
    let registry = Arc::new(SessionRegistry::from_config(&config)?);
    let mux = Arc::new(TmuxMultiplexer::from_config(&config.multiplexer));
    let controller = Arc::new(ProcessSessionController::new(
        mux,
        ControllerSettings::from_config(&config),
    ));
    controller.initialize().await;

    let notifier = notify::from_config(&config);
    let history = Arc::new(RecoveryHistory::load(
        config.recovery_history_path(),
        config.recovery.history_max_entries,
    ));
    let monitor = Arc::new(AutoRecoveryController::new(
        Arc::clone(&registry),
        Arc::clone(&controller),
        Arc::clone(&notifier),
        history,
        RecoveryStrategy::from_config(&config.recovery),
        MonitorSettings::from_config(&config),
    ));

    bootstrap_sessions(&config, &registry, &controller)
        .instrument(info_span!("bootstrap_sessions"))
        .await?;

    if config.recovery.enabled {
        monitor.start();
    } else {
        info!("auto-recovery disabled");
    }

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        registry: Arc::clone(&registry),
        controller: Arc::clone(&controller),
        monitor: Arc::clone(&monitor),
        router: MessageRouter::new(Arc::clone(&registry), Arc::clone(&controller)),
    });

    // ── Start IPC ───────────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = spawn_ipc_server(Arc::clone(&state), ct.clone())?;

    notify_best_effort(
        notifier.as_ref(),
        &format!(
            "Bridge started with {} active session(s)",
            registry.active_count()
        ),
        None,
    )
    .await;
    info!("agent-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    monitor.stop().await;
    shutdown_notice(notifier.as_ref(), &registry).await;

    let _ = ipc_handle.await;
    info!("agent-bridge shut down");

    Ok(())
}

/// Seed the default channel on first run and make sure every registered
/// session has a backend process.
async fn bootstrap_sessions(
    config: &GlobalConfig,
    registry: &SessionRegistry,
    controller: &ProcessSessionController,
) -> Result<()> {
    if registry.list_all().is_empty() {
        if let Some(ref channel_id) = config.default_channel_id {
            let session_id = registry.add(channel_id)?;
            info!(session_id, %channel_id, "default session bootstrapped");
        }
    }

    let agent = &config.agent;
    for entry in registry.list_all() {
        registry.set_launch_params(entry.session_id, &agent.work_dir, &agent.options);
        controller.set_launch_params(entry.session_id, &agent.work_dir, &agent.options);
        if let Err(err) = controller
            .create(entry.session_id, &agent.work_dir, &agent.options)
            .await
        {
            // Left for the monitor to retry.
            error!(session_id = entry.session_id, %err, "failed to start agent session");
        }
    }

    Ok(())
}

async fn shutdown_notice(notifier: &dyn Notifier, registry: &SessionRegistry) {
    notify_best_effort(
        notifier,
        &format!(
            "Bridge shutting down; {} session(s) remain registered",
            registry.list_all().len()
        ),
        None,
    )
    .await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
