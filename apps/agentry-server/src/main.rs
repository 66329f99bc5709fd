use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use wirekit::{Runtime, RuntimeConfig};
use wirekit_bootstrap::{AppConfig, CliArgs};

mod registered_components;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Agentry Server - marker-driven runtime for agent services
#[derive(Parser)]
#[command(name = "agentry-server")]
#[command(about = "Agentry Server - marker-driven runtime for agent services")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config: defaults -> YAML (if provided) -> env (APP__*) -> CLI.
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    let base_dir = std::env::current_dir()?;
    wirekit_bootstrap::logging::init_logging(&logging_config, &base_dir);

    tracing::info!("Agentry Server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!(root = %config.scan.root, "Bootstrapping runtime");

    let runtime = Runtime::bootstrap(RuntimeConfig {
        scan_root: config.scan.root.clone(),
        event_workers: config.events.workers,
    })?;

    // Signals drive the cancellation token; serve() exits when it fires.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = wirekit_bootstrap::signals::wait_for_shutdown().await {
                tracing::warn!(error = %e, "signal waiter failed; falling back to ctrl_c()");
                let _ = tokio::signal::ctrl_c().await;
            }
            cancel.cancel();
        });
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;

    runtime.serve(addr, cancel).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
