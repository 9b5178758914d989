//! Sniper - single-position momentum sniper
//!
//! # WARNING
//! - This engine trades with real money. Only use funds you can afford to lose.
//! - Most momentum tokens round-trip to zero; the sell pipeline limits, not removes, losses.
//! - Use `start --dry-run` to exercise the full decision path against live quotes first.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

use sniper_engine::cli::commands::{self, SettingsChange};
use sniper_engine::config::Config;
use sniper_engine::strategy::SelectionMode;

/// Single-position momentum sniper
#[derive(Parser)]
#[command(name = "sniper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sniper.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Start {
        /// Paper trading: fills at live quotes, no real transactions
        #[arg(long)]
        dry_run: bool,
    },

    /// Manually sell the current position
    Sell {
        /// Percentage of the position to sell
        #[arg(default_value_t = 100.0)]
        percent: f64,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Show what would be sold without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the persisted position and settings
    Status,

    /// Show current configuration (secrets masked)
    Config,

    /// Quote a buy and the immediate sell-back for a mint
    Edge {
        /// Token mint address
        mint: String,

        /// Spend in SOL (default: max buy size)
        #[arg(long)]
        sol: Option<f64>,
    },

    /// View or change persisted runtime settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Allow new buys
    Enable,
    /// Stop new buys (an open position is still managed)
    Disable,
    /// Candidate selection mode: top-n or leader
    Mode { mode: SelectionMode },
    /// Fraction of the native balance spent per buy
    BuyFraction { fraction: f64 },
    /// Decision tick period in milliseconds
    PollMs { ms: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(config, dry_run).await,
        Commands::Sell {
            percent,
            force,
            dry_run,
        } => commands::sell(config, percent, force, dry_run).await,
        Commands::Status => commands::status(config, cli.json).await,
        Commands::Config => commands::show_config(&config),
        Commands::Edge { mint, sol } => commands::edge(config, &mint, sol).await,
        Commands::Settings { action } => {
            let change = match action {
                None => SettingsChange::Show,
                Some(SettingsAction::Enable) => SettingsChange::Enable,
                Some(SettingsAction::Disable) => SettingsChange::Disable,
                Some(SettingsAction::Mode { mode }) => SettingsChange::Mode(mode),
                Some(SettingsAction::BuyFraction { fraction }) => {
                    SettingsChange::BuyFraction(fraction)
                }
                Some(SettingsAction::PollMs { ms }) => SettingsChange::PollMs(ms),
            };
            commands::settings(config, change).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "sniper_engine=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
