//! gamesync - operator tool for one device data directory.
//!
//! # Usage
//!
//! ```bash
//! # Point the device at a sequencing service
//! gamesync --data-dir ./data/device configure --server-url http://ledger:8480
//!
//! # Show pending entries, watermark and last error
//! gamesync --data-dir ./data/device status
//!
//! # Run one push-then-pull round
//! gamesync --data-dir ./data/device sync
//!
//! # List every journal record naming a person
//! gamesync --data-dir ./data/device export-person alice
//!
//! # Sessions of an event, grouped by time slot
//! gamesync --data-dir ./data/device sessions "Spring Con"
//!
//! # Drop the local journal and rebuild from the ledger
//! gamesync --data-dir ./data/device reset
//!
//! # Erase a person everywhere (needs GAMESYNC_PURGE_SECRET)
//! gamesync --data-dir ./data/device purge alice
//! ```

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gamesync_core::{Engine, EngineConfig, SessionFilter, SessionState};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gamesync")]
#[command(author = "GameSync Contributors")]
#[command(version = "0.1.0")]
#[command(about = "GameSync device maintenance tool")]
struct Cli {
    /// Device data directory
    #[arg(short, long, global = true, default_value = "./data/device")]
    data_dir: PathBuf,

    /// Games seeded into the store before replay (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    catalog: Vec<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the engine configuration
    Configure {
        /// Base URL of the sequencing service
        #[arg(long)]
        server_url: Option<String>,
        /// Interval between background sync rounds
        #[arg(long)]
        sync_interval_ms: Option<u64>,
    },

    /// Display sync status of the device
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one sync round against the sequencing service
    Sync,

    /// Print every journal record naming a person
    #[command(name = "export-person")]
    ExportPerson {
        /// Person handle
        handle: String,
    },

    /// List the sessions of an event by time slot
    Sessions {
        /// Event name
        event: String,
        /// Include abandoned sessions
        #[arg(long)]
        all: bool,
        /// Only sessions proposed by or including this person
        #[arg(long)]
        person: Option<String>,
    },

    /// Discard the local journal and rebuild from the ledger
    Reset,

    /// Erase a person from the ledger and every device
    Purge {
        /// Person handle
        handle: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let data_dir = cli.data_dir;
    match cli.command {
        Commands::Configure {
            server_url,
            sync_interval_ms,
        } => cmd_configure(&data_dir, server_url, sync_interval_ms),

        Commands::Status { json } => cmd_status(&data_dir, cli.catalog, json).await,

        Commands::Sync => cmd_sync(&data_dir, cli.catalog).await,

        Commands::ExportPerson { handle } => cmd_export_person(&data_dir, cli.catalog, handle).await,

        Commands::Sessions { event, all, person } => {
            let filter = SessionFilter {
                include_abandoned: all,
                only_person: person,
            };
            cmd_sessions(&data_dir, cli.catalog, event, filter).await
        }

        Commands::Reset => cmd_reset(&data_dir, cli.catalog).await,

        Commands::Purge { handle } => cmd_purge(&data_dir, cli.catalog, handle).await,
    }
}

async fn open(data_dir: &Path, catalog: Vec<String>) -> Result<Engine> {
    Engine::open(data_dir, catalog)
        .await
        .with_context(|| format!("Failed to open device in {}", data_dir.display()))
}

fn cmd_configure(
    data_dir: &Path,
    server_url: Option<String>,
    sync_interval_ms: Option<u64>,
) -> Result<()> {
    let mut config = EngineConfig::load(data_dir)?;
    if let Some(url) = server_url {
        config.server_url = url;
    }
    if let Some(ms) = sync_interval_ms {
        config.sync_interval_ms = ms;
    }
    config.save(data_dir)?;
    println!("Configuration saved to {}", data_dir.display());
    println!("  Server:        {}", config.server_url);
    println!("  Sync interval: {}ms", config.sync_interval_ms);
    Ok(())
}

async fn cmd_status(data_dir: &Path, catalog: Vec<String>, json: bool) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    let status = engine.coordinator().status().await?;
    let (installation, entries, cold) = engine
        .replica()
        .with(|r| (r.installation_id(), r.journal().len(), r.is_cold_start()))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Device:       {}", data_dir.display());
    println!("Installation: {}", installation);
    println!("Server:       {}", engine.config().server_url);
    println!("Journal:      {} entries", entries);
    println!("Pending:      {}", status.pending);
    println!("Watermark:    {}", status.high_watermark);
    if let Some(err) = &status.last_error {
        println!("Last error:   {}", err);
    }
    if cold {
        println!("\nNo local history yet; the next sync rebuilds from the ledger.");
    }
    Ok(())
}

async fn cmd_sync(data_dir: &Path, catalog: Vec<String>) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    let started = chrono::Utc::now();
    println!("Starting sync...");

    let outcome = engine
        .coordinator()
        .run_round()
        .await
        .context("Sync round failed")?
        .ok_or_else(|| anyhow!("Sync is suspended on this device"))?;
    engine.shutdown().await?;

    let elapsed = chrono::Utc::now() - started;
    println!("\nSync completed:");
    println!("  Pushed:     {} entries", outcome.assigned);
    println!("  Pulled:     {} entries", outcome.foreign);
    println!("  Reapplied:  {} entries", outcome.reapplied);
    println!("  Advisories: {}", outcome.advisories);
    println!("  Time:       {}ms", elapsed.num_milliseconds());
    Ok(())
}

async fn cmd_export_person(data_dir: &Path, catalog: Vec<String>, handle: String) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    let query = handle.clone();
    let records = engine
        .replica()
        .with(move |r| r.journal().entries_naming(&query))
        .await?;

    println!(
        "# Records naming {} (exported {})",
        handle,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    for record in &records {
        println!("{}", record);
    }
    if records.is_empty() {
        println!("# none");
    }
    Ok(())
}

async fn cmd_sessions(
    data_dir: &Path,
    catalog: Vec<String>,
    event: String,
    filter: SessionFilter,
) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    let name = event.clone();
    let slots = engine
        .replica()
        .with(move |r| {
            if r.store().event(&name).is_none() {
                return None;
            }
            r.set_filter(filter);
            Some(r.sessions_by_slot(&name))
        })
        .await?
        .ok_or_else(|| anyhow!("Unknown event: {}", event))?;

    println!("Event: {}", event);
    for (slot, sessions) in slots.iter().enumerate() {
        println!("\nSlot {}:", slot);
        if sessions.is_empty() {
            println!("  (no sessions)");
        }
        for session in sessions {
            let marker = match session.state {
                SessionState::Open => "",
                SessionState::Full => " [full]",
                SessionState::Abandoned => " [abandoned]",
            };
            println!(
                "  {} {} by {} ({}/{} seats){}",
                session.id,
                session.to_play,
                session.proposer,
                session.num_sign_ups(),
                session.sits_maximum,
                marker
            );
            if !session.sign_ups.is_empty() {
                println!("    players: {}", session.sign_ups.join(", "));
            }
        }
    }
    Ok(())
}

async fn cmd_reset(data_dir: &Path, catalog: Vec<String>) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    println!("Resetting device...");
    let installation = engine.eraser().reset().await.context("Reset failed")?;
    println!("  New installation: {}", installation);

    match engine.coordinator().run_round().await {
        Ok(Some(outcome)) => println!("  Rebuilt from {} ledger entries", outcome.foreign),
        Ok(None) => println!("  Sync still suspended; rebuild deferred"),
        Err(e) => println!("  Ledger unreachable ({}); rebuild deferred to next sync", e),
    }
    engine.shutdown().await?;
    Ok(())
}

async fn cmd_purge(data_dir: &Path, catalog: Vec<String>, handle: String) -> Result<()> {
    let engine = open(data_dir, catalog).await?;
    println!("Purging {}...", handle);
    let response = engine
        .eraser()
        .purge(&handle)
        .await
        .with_context(|| format!("Purge of {} failed", handle))?;
    if response.entries_rewritten == 0 {
        println!("  Nothing to erase; {} is not in the ledger", handle);
    } else {
        println!("  Rewrote {} ledger entries", response.entries_rewritten);
    }

    if let Err(e) = engine.coordinator().run_round().await {
        println!("  Local rebuild deferred to next sync ({})", e);
    }
    engine.shutdown().await?;
    Ok(())
}
