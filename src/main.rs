//! Command-line entry point for the Haystack client.

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haystack_client::{
    Client,
    ClientConfig,
    config::DEFAULT_CONFIG_FILE,
    zinc::dict_to_json,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// TOML configuration file; `HAYSTACK_*` variables override it.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the project `about` record.
    About,
    /// Print the rows matching a Haystack filter, one JSON object per line.
    Read {
        /// Filter expression, for example `point and his`.
        filter: String,
    },
    /// Print the project time zone.
    Tz,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let client = Client::connect(&config)
        .await
        .context("connecting to server")?;

    let mut out = io::stdout().lock();
    match cli.command {
        Command::About => {
            let about = client.about().await.context("reading about")?;
            writeln!(out, "{about}")?;
        }
        Command::Read { filter } => {
            let rows = client
                .read(&filter)
                .await
                .with_context(|| format!("reading {filter:?}"))?;
            for row in &rows {
                writeln!(out, "{}", dict_to_json(row))?;
            }
        }
        Command::Tz => {
            let tz = client
                .project_timezone()
                .await
                .context("reading project time zone")?;
            writeln!(out, "{}", serde_json::Value::String(tz))?;
        }
    }
    Ok(())
}
