mod abi;
mod balance;
mod checkpoint;
mod cli;
mod config;
mod database;
mod error;
mod ethereum;
mod holdings;
mod indexer;
mod ledger;
mod models;
mod report;
mod runner;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Settings;
use log::error;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = runner::run_once(&settings).await?;
            if !summary.failed.is_empty() {
                error!("Streams failed this run: {}", summary.failed.join(", "));
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let store = runner::open_store(&settings.checkpoint).await?;
            for stream in &settings.streams {
                let state = store.load(&stream.id).await?;
                println!(
                    "{}: block {}, {} addresses, {} days of volume",
                    stream.id,
                    state.last_scanned_block,
                    state.address_balances.len(),
                    state.daily_volume.len()
                );
            }
        }
        Commands::Top { stream, limit } => {
            if !settings.streams.iter().any(|s| s.id == stream) {
                anyhow::bail!("unknown stream '{}'", stream);
            }
            let store = runner::open_store(&settings.checkpoint).await?;
            let state = store.load(&stream).await?;
            let limit = limit.unwrap_or(settings.report.top_n);
            for entry in report::top_n(&state.address_balances, limit) {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}
