mod commands;

use clap::{Parser, Subcommand};
use showdown_core::Choice;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "showdown")]
#[command(about = "Winner-take-all rock/paper/scissors wagers with escrowed stakes")]
#[command(version)]
struct Cli {
    /// Data directory for wager and bank storage
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a player and open a funded wallet account
    Register {
        /// Player name
        name: String,
        /// Starting balance in units
        #[arg(default_value_t = 10_000)]
        funds: u64,
    },
    /// Show a player's wallet balance
    Balance {
        /// Player name
        name: String,
    },
    /// Create a new wager and escrow your stake
    Create {
        /// Player name
        name: String,
        /// Stake in units
        stake: u64,
    },
    /// Join an open wager with a matching stake
    Join {
        /// Player name
        name: String,
        /// Wager ID to join
        wager_id: String,
    },
    /// Submit your choice for the current round
    Play {
        /// Player name
        name: String,
        /// Wager ID
        wager_id: String,
        /// rock, paper or scissors
        choice: Choice,
    },
    /// Show wager status
    Status {
        /// Wager ID
        wager_id: String,
    },
    /// List open wagers
    List,
    /// Show the win standings across settled wagers
    Leaderboard,
    /// Cancel your open wager and get the stake back
    Cancel {
        /// Player name
        name: String,
        /// Wager ID
        wager_id: String,
    },
    /// Start a rematch of a settled wager
    Rematch {
        /// Player name
        name: String,
        /// Wager ID of the settled wager
        wager_id: String,
    },
    /// Resume forfeit timers and follow a wager until it ends
    Watch {
        /// Wager ID
        wager_id: String,
    },
    /// Run a scripted match against a computer opponent
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "showdown={},showdown_engine={},showdown_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("showdown")
    });
    tokio::fs::create_dir_all(&data_dir).await?;

    let ctx = commands::Context::open(&data_dir).await?;

    let result = match cli.command {
        Commands::Register { name, funds } => commands::register(&ctx, &name, funds).await,
        Commands::Balance { name } => commands::balance(&ctx, &name).await,
        Commands::Create { name, stake } => commands::create_wager(&ctx, &name, stake).await,
        Commands::Join { name, wager_id } => commands::join_wager(&ctx, &name, &wager_id).await,
        Commands::Play {
            name,
            wager_id,
            choice,
        } => commands::play(&ctx, &name, &wager_id, choice).await,
        Commands::Status { wager_id } => commands::show_status(&ctx, &wager_id).await,
        Commands::List => commands::list_open(&ctx).await,
        Commands::Leaderboard => commands::leaderboard(&ctx).await,
        Commands::Cancel { name, wager_id } => commands::cancel_wager(&ctx, &name, &wager_id).await,
        Commands::Rematch { name, wager_id } => commands::rematch(&ctx, &name, &wager_id).await,
        Commands::Watch { wager_id } => commands::watch(&ctx, &wager_id).await,
        Commands::Demo => commands::demo(&ctx).await,
    };

    // Balances live in-process; persist them after every command.
    ctx.save_bank()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
