use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use camesp_core::http::{HttpClient, RequestBody};
use camesp_core::link::LinkState;
use camesp_core::telemetry::logging::{self, LogLevel};
use camesp_core::transport::TcpConnector;

#[derive(Parser, Debug)]
#[command(name = "camesp")]
#[command(about = "Camera device core: supervisor, pollers and a one-shot HTTP client")]
pub struct Cli {
    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the device loop until killed or rebooted
    Run {
        /// Directory of the JSON device configuration (overrides CAMESP_CONFIG_DIR)
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
    /// Perform one request through the device HTTP client and print the answer
    Fetch {
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON body to send
        #[arg(long)]
        json: Option<String>,

        /// Extra header, `Name: value`; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Print the body as a hex dump
        #[arg(long)]
        hex: bool,
    },
}

impl Cli {
    pub fn log_config(&self) -> logging::LogConfig {
        logging::LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}

pub async fn run_fetch(
    url: &str,
    method: &str,
    json: Option<String>,
    headers: &[String],
    hex: bool,
    timeout: std::time::Duration,
) -> Result<()> {
    let headers = headers
        .iter()
        .map(|raw| {
            raw.split_once(':')
                .map(|(name, value)| (name.trim(), value.trim()))
                .with_context(|| format!("header {raw:?} is not `Name: value`"))
        })
        .collect::<Result<Vec<_>>>()?;

    let client = HttpClient::new(Arc::new(TcpConnector::new()), LinkState::connected()).with_timeout(timeout);
    let body = RequestBody::from_parts(None, json);
    debug!(%url, %method, "fetching");
    let Some(response) = client.request(method, url, body, &headers).await else {
        bail!("no response from {url}");
    };

    println!("{} {}", response.status, response.reason);
    for (name, value) in &response.headers {
        println!("{name}: {value}");
    }
    println!();
    if hex {
        print!("{}", logging::hexdump(response.content()));
    } else {
        println!("{}", response.text());
    }
    Ok(())
}
