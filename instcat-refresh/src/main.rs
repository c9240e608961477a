//! instcat-refresh - institution catalog refresh pipeline
//!
//! Subcommands:
//! - `run`: refresh cycles every `cycle_interval_secs` until Ctrl-C
//! - `once`: a single cycle over both tiers
//! - `seed <catalog.toml>`: enroll institutions, sources, and baselines
//! - `reset <entity>` / `remove <entity>`: schedule administration
//! - `status`: queue, provenance, and run history summary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use instcat_common::config::{load_toml_config, RootFolderInitializer, RootFolderResolver};
use instcat_common::events::EventBus;
use instcat_common::time;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use instcat_refresh::catalog::{self, Catalog};
use instcat_refresh::db::{runs, statistics};
use instcat_refresh::models::ScheduleStatus;
use instcat_refresh::{PipelineConfig, PipelineServices, RefreshCoordinator, MODULE_NAME};

#[derive(Parser, Debug)]
#[command(name = "instcat-refresh")]
#[command(about = "Institution catalog refresh pipeline")]
#[command(version)]
struct Cli {
    /// Root folder holding instcat.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Configuration file (default: <root>/instcat-refresh.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh continuously until interrupted
    Run,
    /// Run one refresh cycle and exit
    Once,
    /// Enroll institutions from a catalog file
    Seed { catalog: PathBuf },
    /// Return an entity to pending, clearing its failures
    Reset { entity_id: String },
    /// Stop tracking an entity (audit history is kept)
    Remove { entity_id: String },
    /// Print queue and provenance statistics
    Status {
        /// Number of recent runs to show
        #[arg(long, default_value_t = 10)]
        runs: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolver = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_config_file(cli.config.clone());
    let initializer = RootFolderInitializer::new(resolver.resolve());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| initializer.config_path(MODULE_NAME));
    let bootstrap = load_toml_config(&config_path)
        .context("Failed to read configuration")?
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| bootstrap.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting instcat-refresh {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", initializer.root_folder().display());

    let config = PipelineConfig::load(&config_path).context("Invalid pipeline configuration")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = instcat_common::db::init::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let events = EventBus::new(256);
    let services = Arc::new(
        PipelineServices::with_http(db.clone(), config, events)
            .context("Failed to build pipeline")?,
    );

    match cli.command {
        Command::Run => {
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));
            RefreshCoordinator::new(services).run_forever(cancel).await?;
        }
        Command::Once => {
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));
            let summaries = RefreshCoordinator::new(services).run_cycle(&cancel).await?;
            if summaries.is_empty() {
                println!("Nothing due");
            }
            for s in summaries {
                println!(
                    "{:<5} attempted {:>5}  succeeded {:>5}  failed {:>5}{}",
                    s.tier,
                    s.attempted,
                    s.succeeded,
                    s.failed,
                    if s.cancelled { "  (cancelled)" } else { "" }
                );
            }
        }
        Command::Seed { catalog: path } => {
            let catalog = Catalog::load(&path)?;
            let report = catalog::seed(&services, &catalog, time::now()).await?;
            println!(
                "Enrolled {}, updated {}, {} sources, baselines committed {} / rejected {}",
                report.enrolled,
                report.updated,
                report.sources,
                report.baseline_committed,
                report.baseline_rejected
            );
        }
        Command::Reset { entity_id } => {
            services.queue.reset_entry(&entity_id, time::now()).await?;
            println!("Reset {}", entity_id);
        }
        Command::Remove { entity_id } => {
            if services.queue.remove_entity(&entity_id).await? {
                println!("Removed {}", entity_id);
            } else {
                println!("{} is not tracked", entity_id);
            }
        }
        Command::Status { runs: limit } => print_status(&services, limit).await?,
    }

    Ok(())
}

async fn print_status(services: &PipelineServices, run_limit: u32) -> Result<()> {
    let now = time::now();
    let queue = services.queue.queue_stats(now).await?;
    println!("Queue");
    println!(
        "  pending {}  in_progress {}  done {}  failed {}  dead_letter {}",
        queue.pending, queue.in_progress, queue.done, queue.failed, queue.dead_letter
    );
    println!("  backlog {}  stale hot {}", queue.backlog, queue.stale_hot);

    let dead = services
        .queue
        .list_by_status(ScheduleStatus::DeadLetter, 20)
        .await?;
    for entry in dead {
        println!(
            "  dead letter: {} ({})",
            entry.entity_id,
            entry.last_error.as_deref().unwrap_or("-")
        );
    }

    let growth = services.provenance.growth_stats(now).await?;
    println!("Provenance");
    println!(
        "  audit entries {}  last 7d {}  last 30d {}  entities {}  daily avg {:.1}",
        growth.total_audit_entries,
        growth.last_7_days,
        growth.last_30_days,
        growth.distinct_entities,
        growth.daily_average
    );
    for coverage in services.provenance.field_coverage().await? {
        println!(
            "  {:<22} {:>6} entities  avg confidence {:.3}",
            coverage.field_name, coverage.entities, coverage.avg_confidence
        );
    }

    println!("Daily");
    for day in statistics::recent_daily(&services.db, 7).await? {
        println!(
            "  {}  attempted {:>5}  succeeded {:>5}  failed {:>5}  success {}",
            day.date,
            day.attempted,
            day.succeeded,
            day.failed,
            day.success_rate()
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string())
        );
    }

    println!("Runs");
    for run in runs::get_run_history(&services.db, run_limit).await? {
        println!(
            "  {}  {:<4}  attempted {:>5}  succeeded {:>5}  failed {:>5}{}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.tier,
            run.attempted,
            run.succeeded,
            run.failed,
            if run.cancelled { "  cancelled" } else { "" }
        );
    }

    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing in-flight entities"),
        _ = terminate => info!("Received terminate signal, finishing in-flight entities"),
    }
    token.cancel();
}
