mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use camesp_core::config::Config;
use camesp_core::device::Device;
use camesp_core::telemetry::logging;

use crate::cli::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_config()).context("failed to initialise logging")?;

    let config = Config::from_env();
    match cli.command {
        Commands::Fetch {
            url,
            method,
            json,
            headers,
            hex,
        } => cli::run_fetch(&url, &method, json, &headers, hex, config.http_timeout).await,
        Commands::Run { config_dir } => {
            let config = match config_dir {
                Some(dir) => config.with_config_dir(dir),
                None => config,
            };
            info!(?config, "starting device");
            let device = Device::create(config).context("failed to load device configuration")?;
            device.run().await;
            Ok(())
        }
    }
}
