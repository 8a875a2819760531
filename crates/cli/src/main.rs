//! Forno CLI - Order tracking and staff tools.
//!
//! # Usage
//!
//! ```bash
//! # Show (and create on first use) the device client id
//! forno-cli identity
//!
//! # One-shot fetch of the orders visible to this device/user
//! forno-cli orders
//! forno-cli orders --user u-123
//!
//! # Watch orders live until Ctrl+C
//! forno-cli track
//! forno-cli track --user u-123
//!
//! # Staff: move an order forward (metadata-preserving write)
//! forno-cli status --order <id> --set ready
//! ```
//!
//! # Commands
//!
//! - `identity` - Print the durable device client id
//! - `orders` - Fetch visible orders once
//! - `track` - Live order tracking
//! - `status` - Staff-side status transition

#![cfg_attr(not(test), forbid(unsafe_code))]
// The CLI's whole job is to print to stdout.
#![allow(clippy::print_stdout)]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "forno-cli")]
#[command(author, version, about = "Forno d'Oro order tracking tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the durable device client id (created on first use)
    Identity,
    /// Fetch the orders visible to the current identity
    Orders {
        /// Authenticated user id, if a session exists
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Watch orders live until Ctrl+C
    Track {
        /// Authenticated user id, if a session exists
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Staff: transition an order's status
    Status {
        /// Order id
        #[arg(short, long)]
        order: String,

        /// New status (pending, confirmed, preparing, baking, ready,
        /// out_for_delivery, delivered, cancelled)
        #[arg(short, long)]
        set: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing; RUST_LOG overrides the default filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forno_tracking=info,forno_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Identity => commands::identity::show()?,
        Commands::Orders { user } => commands::orders::list(user.as_deref()).await?,
        Commands::Track { user } => commands::track::live(user.as_deref()).await?,
        Commands::Status { order, set } => commands::status::update(&order, &set).await?,
    }
    Ok(())
}
