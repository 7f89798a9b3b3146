//! Guardline CLI - Database migrations and maintenance jobs.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! gl-cli migrate
//!
//! # Delete anonymous carts past their expiry
//! gl-cli purge-carts
//!
//! # Cancel unpaid pending orders older than PENDING_ORDER_TTL_HOURS
//! gl-cli expire-orders
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `purge-carts` - Remove expired session carts
//! - `expire-orders` - Cancel stale pending orders and release their stock

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "gl-cli")]
#[command(author, version, about = "Guardline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Delete expired anonymous carts
    PurgeCarts,
    /// Cancel pending orders that were never paid
    ExpireOrders {
        /// Report what would be expired without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::PurgeCarts => commands::maintenance::purge_carts().await?,
        Commands::ExpireOrders { dry_run } => {
            commands::maintenance::expire_orders(dry_run).await?;
        }
    }
    Ok(())
}
