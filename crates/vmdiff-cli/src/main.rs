//! # vmdiff
//!
//! Differential execution of state tests across EVM implementations.
//!
//! ## Usage
//!
//! ```bash
//! # Execute one test on every VM and compare the traces
//! vmdiff --geth evm --besu evmtool run test.json
//!
//! # Compare post state roots only
//! vmdiff --geth evm --nethermind nethtest roots test.json
//!
//! # Time every test in a directory
//! vmdiff --revme revme speed ./tests
//!
//! # Replay a directory of tests through a full session
//! vmdiff --gethbatch evm --besubatch evmtool --parallel 8 replay ./tests
//! ```

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

mod commands;
mod config;
mod output;

use config::VmArgs;
use output::Output;

/// Differential EVM execution
#[derive(Parser, Debug)]
#[command(name = "vmdiff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    vms: VmArgs,

    /// Executor threads
    #[arg(long, global = true)]
    parallel: Option<usize>,

    /// Directory for outputs and reports
    #[arg(long, global = true)]
    outdir: Option<PathBuf>,

    /// Compare state roots only, without tracing
    #[arg(long, global = true)]
    skiptrace: bool,

    /// Delete tests once executed [default: true]
    #[arg(long, global = true, value_name = "BOOL", action = ArgAction::Set)]
    cleanup_files: Option<bool>,

    /// ntfy.sh topic notified of consensus failures
    #[arg(long, global = true)]
    ntfy: Option<String>,

    /// Keep the raw output of disagreeing clients
    #[arg(long, global = true)]
    rawdebug: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one test on every VM and compare the traces
    Run {
        /// State test file
        test: PathBuf,
    },
    /// Compare the post state roots of one test
    Roots {
        /// State test file
        test: PathBuf,
    },
    /// Time every test under a directory on each VM
    Speed {
        /// Test directory or file
        dir: PathBuf,
    },
    /// Replay every test under a directory through a session
    Replay {
        /// Test directory or file
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = config::session_config(&cli)?;
    let out = Output::new(cli.json);
    let specs = cli.vms.specs();

    let agreed = match cli.command {
        Commands::Run { test } => commands::run::execute(&specs, &config, &test, out).await?,
        Commands::Roots { test } => commands::roots::execute(&specs, &config, &test, out).await?,
        Commands::Speed { dir } => commands::speed::execute(&specs, &config, &dir, out).await?,
        Commands::Replay { dir } => {
            commands::replay::execute(&specs, config, &dir, out, shutdown_signal()).await?
        }
    };
    Ok(if agreed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Completes on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
