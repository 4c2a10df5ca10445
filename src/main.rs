#![forbid(unsafe_code)]

//! `devhost-orchestrator`: runs one application host and its sessions.
//!
//! Reads the host environment (`DEBUG_SESSION_TOKEN`, `DEBUG_SESSION_PORT`,
//! collaborator URLs) from the process environment, binds the control
//! channel and session HTTP surface, optionally starts the host program,
//! and tears everything down on shutdown or when the host goes away.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use devhost_orchestrator::orchestrator::host_process::HostProgram;
use devhost_orchestrator::{AppError, GlobalConfig, HostSpec, Orchestrator, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "devhost-orchestrator",
    about = "Session orchestrator for local development hosts",
    version,
    long_about = None
)]
struct Cli {
    /// Host project path; identifies the host.
    #[arg(long)]
    project: PathBuf,

    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Dashboard URL recorded for the host.
    #[arg(long)]
    dashboard_url: Option<String>,

    /// Host program and its arguments, after `--`.
    #[arg(last = true)]
    host_command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("devhost-orchestrator bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!("configuration loaded");

    let program = args.host_command.split_first().map(|(command, rest)| HostProgram {
        command: command.clone(),
        args: rest.to_vec(),
        working_directory: None,
    });

    let spec = HostSpec {
        project_path: args.project,
        environment: std::env::vars().collect::<HashMap<_, _>>(),
        dashboard_url: args.dashboard_url,
        program,
    };

    // ── Bring up the host ───────────────────────────────
    let orchestrator = Orchestrator::new(config);
    let host = orchestrator.launch_host(spec).await.map_err(|err| {
        error!(%err, "host launch failed");
        err
    })?;
    info!(
        host = %host.id,
        control_addr = %host.control_addr,
        http_addr = %host.http_addr,
        "orchestrator ready"
    );

    let lifetime = orchestrator
        .host_lifetime(&host.id)
        .ok_or_else(|| AppError::NotFound(format!("host {} vanished during startup", host.id)))?;

    // ── Wait for shutdown or host exit ──────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = lifetime.cancelled() => info!("host lifetime ended"),
    }

    orchestrator.close().await;
    info!("devhost-orchestrator shut down");
    Ok(())
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
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
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
