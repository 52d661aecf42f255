use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storage::{Storage, StoredEntry};
use tracing_subscriber::EnvFilter;
use tracker_core::runs;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/soul_link.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every run, newest last.
    Runs,
    /// Print the catches and deaths of one run.
    Ledger { run_number: i64 },
    /// End the active run without going through the chat platform.
    EndRun,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open '{}'", cli.database_url))?;

    match cli.command {
        Command::Runs => {
            for run in storage.list_runs().await? {
                let (caught, dead) = storage.status_counts(run.run_id).await?;
                println!(
                    "run #{}{} caught={caught} dead={dead} started={}",
                    run.run_number,
                    if run.active { " (active)" } else { "" },
                    run.created_at.to_rfc3339()
                );
            }
        }
        Command::Ledger { run_number } => {
            let run = storage
                .run_by_number(run_number)
                .await?
                .with_context(|| format!("run #{run_number} does not exist"))?;
            println!("catches:");
            print_entries(&storage.list_catches(run.run_id).await?);
            println!("deaths:");
            print_entries(&storage.list_deaths(run.run_id).await?);
        }
        Command::EndRun => {
            let summary = runs::end_run(&storage).await?;
            println!(
                "ended run #{} caught={} dead={}",
                summary.run_number, summary.caught, summary.dead
            );
        }
    }

    Ok(())
}

fn print_entries(entries: &[StoredEntry]) {
    if entries.is_empty() {
        println!("  (none)");
    }
    for (idx, entry) in entries.iter().enumerate() {
        println!(
            "  {}. {} [{}] owner={}",
            idx + 1,
            entry.name,
            entry.location,
            entry.owner_user_id
        );
    }
}
