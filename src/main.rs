use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schedule_sync::application::commands::{auth_impl, init_impl, logout_impl, preview_impl, sync_impl};
use schedule_sync::infrastructure::config::{CONFIG_DIR, SCHEDULE_JSON};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "schedule-sync")]
#[command(about = "Synchronise a weekly class-schedule spreadsheet with Google Calendar")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the schedule and reconcile it with the calendar
    Sync {
        /// Log what would change without touching the calendar or the cache
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the extracted appointments
    Preview,
    /// Authorise access to Google Calendar
    Auth {
        /// Authorization code returned by the consent screen
        #[arg(long)]
        code: Option<String>,
    },
    /// Remove the stored Google token
    Logout,
    /// Create the config and state directories with a default config
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SCHEDULE_JSON));

    match cli.command {
        Commands::Init => {
            let result = init_impl(&config_path)
                .with_context(|| format!("Failed to initialise workspace for {}", config_path.display()))?;
            println!("workspace: {}", result.workspace_root.display());
            println!("config: {}", result.config_path.display());
        }
        Commands::Preview => {
            let rows = preview_impl(&config_path).context("Failed to extract schedule")?;
            for row in &rows {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    row.begin, row.end, row.appointment_type, row.title, row.checksum
                );
            }
            info!(count = rows.len(), "previewed appointments");
        }
        Commands::Auth { code } => {
            let response = auth_impl(&config_path, code)
                .await
                .context("Failed to authenticate with Google")?;
            match response.authorization_url {
                Some(url) => {
                    println!("Open this URL, grant access, then run `schedule-sync auth --code <CODE>`:");
                    println!("{url}");
                }
                None => println!(
                    "Authenticated; token valid until {}",
                    response.expires_at.unwrap_or_default()
                ),
            }
        }
        Commands::Logout => {
            let removed = logout_impl(&config_path).context("Failed to remove stored token")?;
            if removed {
                println!("Signed out; run `schedule-sync auth` to authorise again");
            } else {
                println!("No stored token");
            }
        }
        Commands::Sync { dry_run } => {
            let report = sync_impl(&config_path, dry_run)
                .await
                .context("Failed to synchronise schedule")?;
            info!(
                dry_run = report.dry_run,
                created = report.created,
                create_failed = report.create_failed,
                deleted = report.deleted,
                delete_failed = report.delete_failed,
                unchanged = report.unchanged,
                skipped_historic = report.skipped_historic,
                retained_historic = report.retained_historic,
                "sync finished"
            );
        }
    }

    Ok(())
}
