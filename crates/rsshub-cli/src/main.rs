use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rsshub_core::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "rsshub")]
#[command(author, version, about = "Background RSS aggregator with a live-tunable fetch loop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new feed
    Add {
        /// Unique name for the feed
        #[arg(short = 'n', long)]
        name: String,
        /// RSS feed URL
        #[arg(short = 'u', long)]
        url: String,
    },
    /// List registered feeds, newest first
    List {
        /// Show at most this many feeds
        #[arg(short = 'n', long)]
        num: Option<u32>,
    },
    /// Remove a feed and its articles
    Delete {
        /// Name of the feed to remove
        #[arg(short = 'n', long)]
        name: String,
    },
    /// Show the latest articles of a feed
    Articles {
        /// Feed to read from
        #[arg(short = 'f', long)]
        feed_name: String,
        /// Number of articles to show
        #[arg(short = 'n', long, default_value_t = 3)]
        num: u32,
    },
    /// Run the aggregator in the foreground until Ctrl+C
    Fetch,
    /// Change the fetch interval of the running aggregator
    SetInterval {
        /// New interval, e.g. 30s, 5m or 1h30m
        #[arg(short = 'd', long)]
        duration: String,
    },
    /// Change the worker count of the running aggregator
    SetWorkers {
        /// New number of workers
        #[arg(short = 'c', long, allow_negative_numbers = true)]
        count: i64,
    },
    /// Show the state of the running aggregator
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Add { name, url } => commands::add::run(&config, &name, &url).await,
        Commands::List { num } => commands::list::run(&config, num).await,
        Commands::Delete { name } => commands::delete::run(&config, &name).await,
        Commands::Articles { feed_name, num } => {
            commands::articles::run(&config, &feed_name, num).await
        }
        Commands::Fetch => commands::fetch::run(&config).await,
        Commands::SetInterval { duration } => commands::interval::run(&config, &duration).await,
        Commands::SetWorkers { count } => commands::workers::run(&config, count).await,
        Commands::Status => commands::status::run(&config).await,
    }
}
