use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use crashsync::config::SyncConfig;
use crashsync::error::SyncError;
use crashsync::notify::SendmailNotifier;
use crashsync::store::sqlite::{SqliteIssueStore, SqliteSpecStore};
use crashsync::sync::Reconciler;
use fs2::FileExt;
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crashsync")]
#[command(about = "Reconciles telemetry crash specs with the issue tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); CRASHSYNC_* env vars override it
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation batch over all pending crash specs
    Sync {
        /// Apply tracker updates and send email. Without this flag every
        /// write is logged with a DRY prefix and nothing is mutated.
        #[arg(long)]
        prod: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { prod } => run_sync(cli.config.as_deref(), !prod),
    }
}

fn run_sync(config_path: Option<&str>, dry_run: bool) -> Result<()> {
    let config = SyncConfig::load(config_path)?;

    // One run at a time; overlapping cron invocations would double-post.
    let lock_file = File::create(&config.lock_path)
        .with_context(|| format!("failed to create lockfile {}", config.lock_path))?;
    lock_file.try_lock_exclusive().map_err(|_| SyncError::AlreadyRunning {
        path: config.lock_path.clone(),
    })?;

    if dry_run {
        log::info!("dry run, tracker will not be updated (pass --prod to apply)");
    }

    let issue_store = SqliteIssueStore::new(PathBuf::from(&config.tracker_db))?;
    let spec_store = SqliteSpecStore::new(PathBuf::from(&config.telemetry_db))?;
    log::debug!(
        "opened tracker mirror {:?} and telemetry db {:?}",
        issue_store.path(),
        spec_store.path()
    );

    // The reconciler logs the composed body instead of sending it on dry
    // runs; the notifier is only ever reached with --prod.
    let notifier = SendmailNotifier {
        from: config.email.from.clone(),
        to: config.email.to.clone(),
        subject: config.email.subject.clone(),
    };

    let reconciler = Reconciler {
        issue_store: &issue_store,
        spec_store: &spec_store,
        notifier: &notifier,
        config: &config,
        dry_run,
    };

    let stats = match reconciler.run() {
        Ok(stats) => stats,
        Err(err) if matches!(err.downcast_ref(), Some(SyncError::NoPendingSpecs)) => {
            log::info!("nothing to do");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    println!("{}", "reconciliation complete".bold());
    println!("  processed: {}", stats.processed.to_string().cyan());
    println!("  ignored:   {}", stats.ignored.to_string().yellow());
    println!("  updated:   {}", stats.updated.to_string().green());
    println!("  opened:    {}", stats.opened.to_string().green());
    println!("  notified:  {}", stats.notified.to_string().magenta());
    println!("  unchanged: {}", stats.unchanged);
    Ok(())
}
