//! Cross-chain swap harvester
//!
//! Scans the Swap events of the configured pools, keeps the rolling window
//! aggregate on disk and serves it as a small report.

use clap::{Parser, Subcommand};
use eyre::Result;
use std::sync::Arc;
use swap_harvest::{
    AppConfig, HarvestServiceBuilder, JsonFileStore, RunOptions, api, utils::config_loader::ConfigSectionLoader,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swap-harvest")]
#[command(about = "Harvest swap activity across chains into a rolling aggregate")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "harvest.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every source missing from the stored document
    Harvest {
        /// Scan this source again even if it is already stored
        #[arg(long = "rescan", value_name = "ID")]
        rescan: Vec<String>,

        /// Scan every source again
        #[arg(long)]
        no_skip: bool,

        /// Scan again the stored sources that have unresolved gaps
        #[arg(long)]
        retry_incomplete: bool,
    },
    /// Serve the stored document over HTTP
    Serve {
        /// Override the bind address
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swap_harvest=info")))
        .with_target(false)
        .with_line_number(true)
        .init();

    let mut config = AppConfig::load_section_from_file(cli.config.clone())
        .await
        .map_err(|e| eyre::eyre!("Failed to load {}: {}", cli.config, e))?;
    config.harvest = config.harvest.with_env_overrides()?;
    config.server = config.server.with_env_overrides();
    config.validate()?;

    match cli.command {
        Command::Harvest { rescan, no_skip, retry_incomplete } => {
            let mut options = RunOptions::from_config(&config.harvest).with_rescan(rescan);
            if no_skip {
                options.skip_existing = false;
            }
            if retry_incomplete {
                options.retry_incomplete = true;
            }

            info!("Loaded {} sources from {}", config.sources.len(), cli.config);
            let service = HarvestServiceBuilder::new(config.harvest.clone()).with_sources(config.sources).build()?;
            let report = service.run(&options).await?;

            if !report.persisted {
                return Err(eyre::eyre!("Results could not be saved to {}", config.harvest.state_path));
            }
            if !report.failed.is_empty() {
                warn!("Sources that failed this run: {:?}", report.failed);
            }
        }
        Command::Serve { bind } => {
            let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());
            let store = Arc::new(JsonFileStore::new(config.served_state_path()));
            info!("Serving {}", store.path().display());
            api::start_server(store, &bind_address).await?;
        }
    }

    Ok(())
}
