use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Parser)]
#[command(name = "cse-pipeline")]
#[command(about = "Colombo Stock Exchange market data poller", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll continuously during market hours until Ctrl-C
    Run {
        /// Root directory for stored data (default: CSE_DATA_DIR or ./data)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Seconds between poll cycles (minimum 60)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run one full poll cycle now, regardless of market hours
    Once {
        /// Root directory for stored data (default: CSE_DATA_DIR or ./data)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the latest stored payload of a dataset
    Latest {
        /// Dataset name, e.g. securities, marketSnapshot, todaySharePrice
        dataset: String,

        /// Root directory for stored data (default: CSE_DATA_DIR or ./data)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { data_dir, interval } => {
            commands::run::run(data_dir, interval).await;
        }
        Commands::Once { data_dir } => {
            commands::once::run(data_dir).await;
        }
        Commands::Latest { dataset, data_dir } => {
            commands::latest::run(dataset, data_dir).await;
        }
    }
}
