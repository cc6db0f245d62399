use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "token-dashboard-indexer")]
#[command(about = "Index token contract events into per-stream checkpoints and a dashboard report")]
pub struct Cli {
    /// YAML settings file
    #[arg(short, long, default_value = "config.yml", global = true)]
    pub config: PathBuf,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl every stream once, snapshot holdings and write the report
    Run,
    /// Show the saved checkpoint of every stream
    Status,
    /// Print the largest first-sight balances of a stream
    Top {
        #[arg(short, long)]
        stream: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default() {
        let cli = Cli::parse_from(["token-dashboard-indexer"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config.yml"));
    }

    #[test]
    fn parses_top_with_global_config() {
        let cli = Cli::parse_from([
            "token-dashboard-indexer",
            "top",
            "--stream",
            "transfers",
            "-l",
            "3",
            "--config",
            "mana.yml",
        ]);
        assert_eq!(cli.config, PathBuf::from("mana.yml"));
        match cli.command {
            Some(Commands::Top { stream, limit }) => {
                assert_eq!(stream, "transfers");
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected top"),
        }
    }
}
