//! `trawl` — run the aggregation gateway.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trawl_datasources::DatasourceRegistry;
use trawl_server::{Gateway, GatewayError, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "trawl", version, about = "Real-time search aggregation gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file.
    #[arg(short, long, env = "TRAWL_ADDRESS")]
    address: Option<String>,
}

fn load_config(cli: &Cli) -> Result<ServerConfig, GatewayError> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = &cli.address {
        config.address.clone_from(address);
        config.validate()?;
    }
    Ok(config)
}

async fn run(config: ServerConfig) -> Result<(), GatewayError> {
    let registry = DatasourceRegistry::with_builtin();
    let datasources = registry.build_set(&config.datasources);
    if datasources.is_empty() {
        info!("no datasources configured");
    }

    let gateway = Gateway::bind(&config, datasources).await?;
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    gateway.run(shutdown).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("trawl: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    trawl_server::guard::install_panic_hook();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}
