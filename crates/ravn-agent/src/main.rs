//! RAVN agent binary entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ravn_core::config::AgentConfig;
use ravn_core::error::Error;
use ravn_agent::agent::Agent;
use ravn_agent::status::run_status_server;

/// Exit codes per the agent's contract.
const EXIT_INIT_FAILURE: u8 = 1;
const EXIT_INSUFFICIENT_PRIVILEGES: u8 = 2;
const EXIT_STORE_UNAVAILABLE: u8 = 3;

/// RAVN - host-resident security observability agent.
#[derive(Parser, Debug)]
#[command(name = "ravn", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/ravn/config.toml")]
    config: PathBuf,

    /// Override the store path from the configuration.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the status bind address from the configuration.
    #[arg(long)]
    status_addr: Option<String>,

    /// Lower the log filter to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration before tracing so the config log level can act as
    // the fallback filter. RAVN_LOG always wins.
    let mut config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ravn: failed to load {}: {e}", args.config.display());
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };
    if let Some(db) = args.db {
        config.store_path = db;
    }
    if let Some(addr) = args.status_addr {
        config.status_bind_addr = addr;
    }

    init_tracing(&config, args.verbose);
    info!(config = %args.config.display(), "ravn starting");

    // Loading eBPF programs requires root.
    if !nix::unistd::geteuid().is_root() {
        error!("ravn requires root privileges to load eBPF probes");
        return ExitCode::from(EXIT_INSUFFICIENT_PRIVILEGES);
    }

    let status_addr: SocketAddr = match config.status_bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(addr = %config.status_bind_addr, error = %e, "invalid status bind address");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    let mut agent = match Agent::init(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "initialization failed");
            return ExitCode::from(match e {
                Error::Storage(_) | Error::Schema | Error::Busy => EXIT_STORE_UNAVAILABLE,
                _ => EXIT_INIT_FAILURE,
            });
        }
    };

    if let Err(e) = agent.start() {
        error!(error = %e, "start failed");
        return ExitCode::from(EXIT_INIT_FAILURE);
    }

    let token = agent.shutdown_token();
    let status = agent.status_handle();

    let status_task = tokio::spawn(run_status_server(status_addr, status, token.clone()));

    // Signal handling: the token is the only cross-component shutdown path.
    let signal_token = token.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
        signal_token.signal();
    });

    let result = agent.run().await;

    // A fatal pipeline condition can end the run without the token having
    // been signalled; set it so the status server winds down too.
    token.signal();
    if let Ok(Err(e)) = status_task.await {
        error!(error = %e, "status server failed");
    }

    match result {
        Ok(()) => {
            info!("ravn shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "pipeline failed");
            ExitCode::from(EXIT_INIT_FAILURE)
        }
    }
}

/// Priority: RAVN_LOG env var, then --verbose, then the config log level,
/// then info.
fn init_tracing(config: &AgentConfig, verbose: bool) {
    let filter = EnvFilter::try_from_env("RAVN_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else if let Some(level) = config.log_level.as_deref() {
            EnvFilter::new(level)
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
