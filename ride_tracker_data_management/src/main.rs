use std::path::PathBuf;

use anyhow::{anyhow, Context};
use chrono::{FixedOffset, TimeZone};
use clap::{Parser, Subcommand};
use ride_tracker_data_management::DataManager;
use ride_tracker_lib::{
    log_entry::{EntryKind, HistoryFilter, NewEntry},
    user::OwnerId,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "RideCLI")]
#[command(about = "A CLI to manage users and log entries", long_about = None)]
struct Cli {
    /// Database file, defaults to the project's data directory
    #[arg(long, env = "RIDE_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user and print its API token
    AddUser { name: String },
    /// List all users
    Users,
    /// List the history of a user
    List {
        owner_id: String,
        /// all, ride, fuel or expense
        #[arg(long, default_value = "all")]
        kind: HistoryFilter,
    },
    /// Add an entry by hand
    Add {
        owner_id: String,
        kind: EntryKind,
        amount: f64,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        odometer: Option<f64>,
    },
    /// Delete an entry
    Delete { owner_id: String, entry_id: i64 },
}

fn owner(id: &str) -> anyhow::Result<OwnerId> {
    OwnerId::new(id).ok_or_else(|| anyhow!("Owner id must not be empty"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let data_manager = match &cli.database {
        Some(path) => DataManager::open(path).await,
        None => DataManager::start().await,
    }
    .context("Failed to open database")?;

    match cli.command {
        Commands::AddUser { name } => {
            let (user, token) = data_manager.register_user(&name).await?;
            println!("{}\t{}\t{}", user.owner_id, user.name, token);
        }
        Commands::Users => {
            for user in data_manager.get_users().await? {
                println!("{}\t{}\t{}", user.owner_id, user.created_at.format("%d/%m/%Y"), user.name);
            }
        }
        Commands::List { owner_id, kind } => {
            // Dates in IST, like the app shows them
            let ist = FixedOffset::east_opt(5 * 3600 + 1800).ok_or_else(|| anyhow!("Invalid offset"))?;
            for entry in data_manager.history(&owner(&owner_id)?, kind).await? {
                let amount = match entry.kind {
                    EntryKind::Ride => format!("+{} km", entry.amount),
                    _ => format!("{:.0}", entry.amount),
                };
                let odometer = entry.odometer.map(|reading| format!("ODO: {reading}")).unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    entry.entry_id,
                    ist.from_utc_datetime(&entry.created_at.naive_utc()).format("%d %b, %I:%M %p"),
                    entry.kind,
                    amount,
                    entry.title(),
                    odometer
                );
            }
        }
        Commands::Add { owner_id, kind, amount, description, odometer } => {
            let entry = NewEntry::manual(kind, amount, description, odometer)?;
            let entry = data_manager.append_entry(&owner(&owner_id)?, entry).await?;
            println!("Added entry {}", entry.entry_id);
        }
        Commands::Delete { owner_id, entry_id } => {
            if !data_manager.delete_entry(&owner(&owner_id)?, entry_id).await? {
                return Err(anyhow!("No entry {} for {}", entry_id, owner_id));
            }
        }
    }

    Ok(())
}
