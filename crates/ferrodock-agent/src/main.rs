//! ferrodock - Molecular docking job runner.
//! Entry point for the command-line binary.

mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "ferrodock", version, about = "Dock candidate molecules against target proteins")]
struct Cli {
    /// Path to ferrodock.toml.
    #[arg(long, global = true, env = "FERRODOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the worker pool until interrupted.
    Worker {
        /// Override `workers.count`.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Queue one docking job.
    Submit {
        #[arg(long)]
        candidate: String,
        /// Register this SMILES for the candidate before submitting.
        #[arg(long)]
        smiles: Option<String>,
        /// Run the job in this process instead of leaving it to a worker.
        #[arg(long)]
        run: bool,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Queue one job per candidate against the same target.
    SubmitBatch {
        /// Candidate ids, comma separated.
        #[arg(long, value_delimiter = ',', required_unless_present = "smiles_file")]
        candidates: Vec<String>,
        /// `.smi` file of `SMILES ID` lines; every entry is registered and queued.
        #[arg(long)]
        smiles_file: Option<PathBuf>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Show the status and progress of a job.
    Status { job_id: Uuid },
    /// Show the poses of a finished job.
    Results { job_id: Uuid },
    /// Cancel a queued or running job.
    Cancel {
        job_id: Uuid,
        #[arg(long)]
        user: Option<String>,
    },
    /// List jobs, newest first.
    History {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        status: Option<ferrodock_common::JobStatus>,
        #[arg(long)]
        target: Option<String>,
        /// Only jobs created in the last N hours.
        #[arg(long)]
        since_hours: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Best-scoring poses across completed jobs for a target.
    Best {
        #[arg(long)]
        target: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Job and pose counts.
    Stats,
    /// Delete expired terminal jobs and their working directories.
    Cleanup,
    /// Show which docking engine would be used and whether it responds.
    Engine,
    /// Convert a structure to PDBQT without queueing a job.
    Prepare {
        #[command(subcommand)]
        input: PrepareInput,
    },
    /// Compute a search box from a structure.
    Grid {
        #[arg(long)]
        pdb: PathBuf,
        /// Binding site, e.g. `A:12,45,78`.
        #[arg(long, conflicts_with = "reference")]
        site: Option<String>,
        /// Reference ligand (PDB) to box with padding.
        #[arg(long)]
        reference: Option<PathBuf>,
        #[arg(long, default_value_t = 5.0)]
        padding: f64,
    },
}

#[derive(Debug, Subcommand)]
enum PrepareInput {
    Ligand {
        #[arg(long)]
        smiles: String,
        #[arg(long)]
        out: PathBuf,
    },
    Receptor {
        #[arg(long)]
        pdb: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

/// Settings shared by single and batch submission.
#[derive(Debug, Args)]
struct JobArgs {
    #[arg(long)]
    target: String,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    disease: Option<String>,
    /// Register this PDB file as the target structure before submitting.
    #[arg(long)]
    pdb: Option<PathBuf>,
    /// Binding site stored with `--pdb`, e.g. `A:12,45,78`.
    #[arg(long, requires = "pdb")]
    site: Option<String>,
    /// Box center `x,y,z`; needs `--size`.
    #[arg(long, value_delimiter = ',', num_args = 3, requires = "size")]
    center: Option<Vec<f64>>,
    /// Box edge lengths `x,y,z` in Å, clamped to [10, 50].
    #[arg(long, value_delimiter = ',', num_args = 3, requires = "center")]
    size: Option<Vec<f64>>,
    #[arg(long, default_value_t = 8)]
    exhaustiveness: u32,
    #[arg(long, default_value_t = 9)]
    num_modes: u32,
    #[arg(long, default_value_t = 3.0)]
    energy_range: f64,
    #[arg(long)]
    cpu: Option<u32>,
    #[arg(long)]
    seed: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ferrodock=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), database = %config.database.url, "ferrodock starting");

    let app = commands::App::new(config);
    if let Err(e) = run(&app, cli.command).await {
        if let Some(err) = e.downcast_ref::<ferrodock_common::DockingError>() {
            if err.is_retryable_later() {
                tracing::warn!("Queue is full for this user; retry once running jobs finish");
            } else if err.is_permanent() {
                tracing::debug!("Request rejected; retrying will not help");
            }
        }
        return Err(e);
    }
    Ok(())
}

async fn run(app: &commands::App, command: Command) -> anyhow::Result<()> {
    let output = match command {
        Command::Worker { workers } => {
            app.worker(workers).await?;
            return Ok(());
        }
        Command::Submit { candidate, smiles, run, job } => {
            app.submit(&candidate, smiles.as_deref(), run, job).await?
        }
        Command::SubmitBatch { candidates, smiles_file, job } => {
            app.submit_batch(candidates, smiles_file.as_deref(), job).await?
        }
        Command::Status { job_id } => app.status(job_id).await?,
        Command::Results { job_id } => app.results(job_id).await?,
        Command::Cancel { job_id, user } => app.cancel(job_id, user.as_deref()).await?,
        Command::History { user, status, target, since_hours, limit, offset } => {
            let filter = ferrodock_db::JobFilter {
                user_id: user,
                status,
                target_id: target,
                since: since_hours.map(|h| chrono::Utc::now() - chrono::Duration::hours(h)),
            };
            app.history(&filter, limit, offset).await?
        }
        Command::Best { target, limit } => app.best(&target, limit).await?,
        Command::Stats => app.stats().await?,
        Command::Cleanup => app.cleanup().await?,
        Command::Engine => app.engine().await?,
        Command::Prepare { input } => match input {
            PrepareInput::Ligand { smiles, out } => app.prepare_ligand(&smiles, &out)?,
            PrepareInput::Receptor { pdb, out } => app.prepare_receptor(&pdb, &out)?,
        },
        Command::Grid { pdb, site, reference, padding } => {
            app.grid(&pdb, site.as_deref(), reference.as_deref(), padding)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
