//! Command-line surface: argument parsing and the command runners.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chainwork_core::app::{BlurRepository, Scheduler, ShutdownMode, load_chain_status};
use chainwork_core::domain::{ChainStatus, TaskId};
use chainwork_core::impls::{
    FsImageStore, FsMediaStore, FsOutputDir, JsonFileTaskStore, ScaleBlur, file_locator,
};
use chainwork_core::ports::{StoreCounts, TaskStore};
use chainwork_core::tasks::TaskRegistry;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::settings::{Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "chainwork")]
#[command(about = "Run and inspect durable blur work chains")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON settings file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Task store snapshot.
    #[arg(long, global = true)]
    pub state_path: Option<PathBuf>,

    /// Directory for intermediate blur outputs.
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Directory persisted images are copied into.
    #[arg(long, global = true)]
    pub media_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Minimum time each task body takes, in milliseconds.
    #[arg(long, global = true)]
    pub delay_floor_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Blur an image and persist the result.
    Blur {
        #[arg(long)]
        image: PathBuf,

        #[arg(long, default_value = "1")]
        level: i64,
    },

    /// Print task counts and chain statuses, or one task record.
    Status {
        #[arg(long)]
        task: Option<TaskId>,
    },

    /// Remove finished chains older than the given age.
    Prune {
        #[arg(long)]
        older_than_secs: u64,
    },
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            workers: self.workers,
            delay_floor_ms: self.delay_floor_ms,
            state_path: self.state_path.clone(),
            output_dir: self.output_dir.clone(),
            media_dir: self.media_dir.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    counts: StoreCounts,
    chains: Vec<ChainStatus>,
}

pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("cannot load settings")?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Commands::Blur { image, level } => {
            let locator = blur(&settings, &image, level).await?;
            println!("{locator}");
        }
        Commands::Status { task } => println!("{}", status(&settings, task).await?),
        Commands::Prune { older_than_secs } => {
            let removed = prune(&settings, older_than_secs).await?;
            println!("removed {removed} task records");
        }
    }
    Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<JsonFileTaskStore> {
    JsonFileTaskStore::open(settings.state_path.clone())
        .await
        .with_context(|| format!("cannot open task store {}", settings.state_path.display()))
}

fn blur_registry(settings: &Settings) -> anyhow::Result<TaskRegistry> {
    let registry = TaskRegistry::blur_pipeline(
        Arc::new(FsImageStore::new(settings.output_dir.clone())),
        Arc::new(ScaleBlur),
        Arc::new(FsMediaStore::new(settings.media_dir.clone())),
        Arc::new(FsOutputDir::new(settings.output_dir.clone())),
    )?;
    Ok(registry)
}

/// Run one blur chain to its end. Ctrl-C stops the scheduler and leaves the
/// interrupted task for the next start to recover.
async fn blur(settings: &Settings, image: &Path, level: i64) -> anyhow::Result<String> {
    let image = std::path::absolute(image)
        .with_context(|| format!("cannot resolve {}", image.display()))?;
    let store = open_store(settings).await?;
    let scheduler = Arc::new(
        Scheduler::start(settings.scheduler.clone(), Arc::new(store), blur_registry(settings)?)
            .await
            .context("cannot start scheduler")?,
    );
    let report = scheduler.recovery_report();
    if report.requeued + report.failed + report.released + report.resumed > 0 {
        tracing::info!(?report, "resumed work from a previous run");
    }

    let repo = BlurRepository::new(Arc::clone(&scheduler), file_locator(&image));
    let outcome = tokio::select! {
        locator = repo.apply_blur(level) => Some(locator),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(locator) => {
            scheduler.shutdown(ShutdownMode::Drain).await;
            match locator {
                Some(locator) => Ok(locator),
                None => bail!("blur chain for {} did not succeed", image.display()),
            }
        }
        None => {
            tracing::warn!("interrupted; unfinished work resumes on the next run");
            scheduler.shutdown(ShutdownMode::Cancel).await;
            bail!("interrupted")
        }
    }
}

async fn status(settings: &Settings, task: Option<TaskId>) -> anyhow::Result<String> {
    let store = open_store(settings).await?;
    let text = match task {
        Some(id) => {
            let record = store
                .get(id)
                .await
                .with_context(|| format!("cannot read task {id}"))?;
            serde_json::to_string_pretty(&record)?
        }
        None => {
            let mut chains = Vec::new();
            for chain in store.list_chains().await? {
                chains.push(load_chain_status(&store, chain.id).await?);
            }
            let report = StatusReport {
                counts: store.counts_by_state().await?,
                chains,
            };
            serde_json::to_string_pretty(&report)?
        }
    };
    Ok(text)
}

async fn prune(settings: &Settings, older_than_secs: u64) -> anyhow::Result<usize> {
    let cutoff = i64::try_from(older_than_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        .with_context(|| format!("--older-than-secs {older_than_secs} is out of range"))?;
    let store = open_store(settings).await?;
    let removed = store.purge_finished(cutoff).await?;
    tracing::info!(removed, "pruned finished chains");
    Ok(removed)
}
