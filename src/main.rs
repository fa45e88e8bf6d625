use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shadow_mirror_lib::commands::capture::acquire_cycle_lock;
use shadow_mirror_lib::commands::db::{list_recent, open_snapshot_store};
use shadow_mirror_lib::commands::restore::verify_snapshot;
use shadow_mirror_lib::models::report::{CycleOutcome, RestoreReport};
use shadow_mirror_lib::remote::PostgrestStore;
use shadow_mirror_lib::{
    load_config, restore_from_export, restore_from_store, run_backup_cycle, RestoreOptions,
    ShadowConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "shadow-mirror")]
#[command(about = "Snapshot backup and restoration for the task store")]
#[command(version)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup cycle: probe, capture, guard, store, export, prune
    Capture {
        /// Store the snapshot even if the anomaly guard trips
        #[arg(long)]
        force: bool,
    },
    /// Replay a snapshot into the remote store
    Restore {
        /// Snapshot id (default: latest known-good)
        #[arg(long, conflicts_with = "from_export")]
        snapshot_id: Option<i64>,
        /// Restore from the flat export file instead of the snapshot store
        #[arg(long)]
        from_export: Option<PathBuf>,
        /// Owner to assign to restored records
        #[arg(long)]
        user_id: Option<String>,
        /// Print the decision trace without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Also restore soft-deleted and tombstoned records
        #[arg(long)]
        skip_filter: bool,
    },
    /// List recent snapshots
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Recompute a snapshot's checksum (default: latest known-good)
    Verify {
        #[arg(long)]
        id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("FAILED: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref(), |key| std::env::var(key).ok())
        .context("failed to load configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Capture { force } => capture(&config, force).await,
        Commands::Restore {
            snapshot_id,
            from_export,
            user_id,
            dry_run,
            skip_filter,
        } => {
            let options = RestoreOptions {
                snapshot_id,
                target_user_id: user_id,
                dry_run,
                skip_filter,
            };
            restore(&config, from_export, &options).await
        }
        Commands::List { limit } => list(&config, limit),
        Commands::Verify { id } => verify(&config, id),
    }
}

async fn capture(config: &ShadowConfig, force: bool) -> Result<ExitCode> {
    let _lock = acquire_cycle_lock(&config.lock_path())?;
    let remote = PostgrestStore::new(&config.remote)?;
    let conn = open_snapshot_store(&config.db_path()).context("failed to open snapshot store")?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let outcome = run_backup_cycle(config, &remote, &conn, now_ms, force).await?;
    println!("{}", serde_json::to_string(&outcome)?);

    match &outcome {
        CycleOutcome::Completed { snapshot_id, item_count, .. } => {
            println!("OK: snapshot {snapshot_id} stored with {item_count} items");
            Ok(ExitCode::SUCCESS)
        }
        CycleOutcome::Unhealthy { .. } => {
            eprintln!("REMOTE_UNHEALTHY: health probe failed; nothing was written");
            Ok(ExitCode::from(1))
        }
        CycleOutcome::GuardBlocked {
            reason,
            previous_counts,
            new_counts,
        } => {
            eprintln!(
                "GUARD_BLOCKED: {reason}; previous={previous_counts:?} new={new_counts:?}; nothing was written (re-run with --force to override)"
            );
            Ok(ExitCode::from(1))
        }
    }
}

async fn restore(
    config: &ShadowConfig,
    from_export: Option<PathBuf>,
    options: &RestoreOptions,
) -> Result<ExitCode> {
    let remote = PostgrestStore::new(&config.remote)?;
    let report = match from_export {
        Some(path) => restore_from_export(config, &remote, &path, options).await?,
        None => {
            let conn = open_snapshot_store(&config.db_path()).context("failed to open snapshot store")?;
            restore_from_store(config, &remote, &conn, options).await?
        }
    };

    print_restore_report(&report);
    if report.total_failed() > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_restore_report(report: &RestoreReport) {
    if report.dry_run {
        println!("DRY RUN: no records were written");
        for decision in &report.decisions {
            println!(
                "  {:<26} {}/{}{}",
                format!("{:?}", decision.action),
                decision.collection,
                decision.id,
                decision
                    .reason
                    .as_deref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default()
            );
        }
    }
    match report.snapshot_id {
        Some(id) => println!("snapshot {id} (captured at {})", report.snapshot_timestamp),
        None => println!("export file (captured at {})", report.snapshot_timestamp),
    }
    println!(
        "target owner: {}",
        report.target_user_id.as_deref().unwrap_or("(unchanged)")
    );
    print!("{}", report.render_tally());
    println!(
        "{} restored, {} failed",
        report.total_restored(),
        report.total_failed()
    );
}

fn list(config: &ShadowConfig, limit: usize) -> Result<ExitCode> {
    let conn = open_snapshot_store(&config.db_path()).context("failed to open snapshot store")?;
    for snapshot in list_recent(&conn, limit)? {
        let taken = chrono::DateTime::from_timestamp_millis(snapshot.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| snapshot.timestamp.to_string());
        println!(
            "{:>6}  {}  items={:<6} healthy={:<5} latency={:>5}ms  {}",
            snapshot.id,
            taken,
            snapshot.item_count,
            snapshot.connection_healthy,
            snapshot.latency_ms,
            &snapshot.checksum[..snapshot.checksum.len().min(12)]
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(config: &ShadowConfig, id: Option<i64>) -> Result<ExitCode> {
    let conn = open_snapshot_store(&config.db_path()).context("failed to open snapshot store")?;
    let (snapshot, bundle) = verify_snapshot(&conn, id)?;
    println!(
        "OK: snapshot {} checksum {} matches ({} items)",
        snapshot.id,
        snapshot.checksum,
        bundle.item_count()
    );
    Ok(ExitCode::SUCCESS)
}
