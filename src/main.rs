//! # Reply Companion CLI (`reply`)
//!
//! ## Usage
//!
//! ```bash
//! reply --config ./config/reply.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reply init` | Create the SQLite database and run schema migrations |
//! | `reply serve` | Start the HTTP bridge for the extension |
//! | `reply cache list` | Show cached replies, oldest first |
//! | `reply cache clear` | Drop every cached reply |
//! | `reply snapshot show` | Print the panel's last saved state |
//! | `reply snapshot clear` | Forget the panel's saved state |
//! | `reply prefs show` | Print generation preferences |
//! | `reply prefs set <key> <value>` | Change one preference |
//! | `reply generate "<text>"` | Generate a reply without the extension |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reply_companion::{config, inspect, migrate, server};

/// Reply Companion: AI reply suggestions with per-post caching.
#[derive(Parser)]
#[command(
    name = "reply",
    about = "Reply Companion: host for AI reply suggestions with per-post caching",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reply.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP bridge on `[server].bind`.
    Serve,

    /// Inspect or reset the reply cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect or reset the panel's saved state.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Read or change generation preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Generate a reply to TEXT and stream it to stdout.
    Generate {
        /// The post text to reply to.
        text: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    List,
    Clear,
}

#[derive(Subcommand)]
enum SnapshotAction {
    Show,
    Clear,
}

#[derive(Subcommand)]
enum PrefsAction {
    Show,
    /// Set one of: tone, length, stance, model, persona_sample (appends).
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::List => inspect::run_cache_list(&cfg).await?,
            CacheAction::Clear => inspect::run_cache_clear(&cfg).await?,
        },
        Commands::Snapshot { action } => match action {
            SnapshotAction::Show => inspect::run_snapshot_show(&cfg).await?,
            SnapshotAction::Clear => inspect::run_snapshot_clear(&cfg).await?,
        },
        Commands::Prefs { action } => match action {
            PrefsAction::Show => inspect::run_prefs_show(&cfg).await?,
            PrefsAction::Set { key, value } => inspect::run_prefs_set(&cfg, &key, &value).await?,
        },
        Commands::Generate { text } => {
            inspect::run_generate(&cfg, &text).await?;
        }
    }

    Ok(())
}
