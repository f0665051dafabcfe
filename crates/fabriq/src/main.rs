//! # Fabriq Node
//!
//! Entry point for the fabric node binary. One executable serves both
//! roles:
//!
//! - `fabriq aggregator --config fabriq.toml` runs a primary or backup
//!   aggregator (the configured initial role; failover may change it)
//! - `fabriq worker --bind ... --bootstrap ...` runs a worker
//!
//! Exit codes: 0 on a graceful halt (signed `Halt` commit or signal), 1 on
//! an unrecoverable internal invariant violation, 2 when the authorized-key
//! set is missing at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fabriq::{aggregator, worker, NodeError};
use fabriq_config::Config;

/// Deterministic real-time distributed control fabric node
#[derive(Parser, Debug)]
#[command(name = "fabriq")]
#[command(version)]
#[command(about = "fabriq - rateless coded computing control fabric")]
struct Cli {
    /// Enable verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: text, json, or compact
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
    Compact,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an aggregator (primary or backup per the configured role)
    Aggregator {
        /// Configuration file path
        #[arg(short, long, default_value = "fabriq.toml")]
        config: PathBuf,
    },

    /// Run a worker
    Worker {
        /// Address to bind the datagram socket to
        #[arg(long)]
        bind: SocketAddr,

        /// JSON bootstrap document holding the system matrix
        #[arg(long)]
        bootstrap: PathBuf,

        /// Backup aggregator address to mirror results to
        #[arg(long)]
        mirror: Option<SocketAddr>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fabriq");

    let outcome = match cli.command {
        Commands::Aggregator { config } => run_aggregator(config).await,
        Commands::Worker { bind, bootstrap, mirror } => {
            worker::run(worker::WorkerOptions { bind, bootstrap_file: bootstrap, mirror }).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "Node terminated");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run_aggregator(config_path: PathBuf) -> Result<(), NodeError> {
    let config = Config::load(&config_path)?;
    aggregator::run(config).await
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => "info",
        1 => "info,fabriq=debug",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(env_filter)
                .init();
        }
    }
}
