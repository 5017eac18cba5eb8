//! Recload Ingest - batch ingestion trigger

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recload_common::logging::{init_logging, LogConfig, LogLevel};
use recload_common::Configuration;
use recload_ingest::datastore::MemoryBackend;
use recload_ingest::producer::{self, Registries};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "recload-ingest")]
#[command(author, version, about = "Ingest raw records into a relational store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every enabled process definition
    Run {
        /// YAML configuration file
        #[arg(short, long, env = "RECLOAD_CONFIG")]
        config: PathBuf,

        /// Only run this process definition
        #[arg(short, long)]
        process: Option<String>,

        /// Keep every write in memory instead of the configured datastore
        #[arg(long)]
        dry_run: bool,
    },

    /// List the datasources each process would ingest
    Discover {
        #[arg(short, long, env = "RECLOAD_CONFIG")]
        config: PathBuf,

        #[arg(short, long)]
        process: Option<String>,
    },
}

impl Command {
    fn config_path(&self) -> &PathBuf {
        match self {
            Command::Run { config, .. } | Command::Discover { config, .. } => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let path = cli.command.config_path();
    let config = Configuration::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let mut log_config = LogConfig::from_configuration(&config).with_env_overrides()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            process, dry_run, ..
        } => run(&config, process.as_deref(), dry_run).await,
        Command::Discover { process, .. } => discover(&config, process.as_deref()).await,
    }
}

async fn run(config: &Configuration, process: Option<&str>, dry_run: bool) -> Result<()> {
    let backend = MemoryBackend::new();
    let registries = if dry_run {
        info!("Dry run, records are kept in memory");
        Registries::dry_run(&backend)
    } else {
        Registries::builtin()
    };

    let prepared = producer::prepare(config, &registries, process).await;
    info!(
        processes = prepared.processes.len(),
        batches = prepared.batch_count(),
        skipped = prepared.skipped.len(),
        "Run prepared"
    );

    let report = producer::execute(prepared).await;
    let totals = &report.totals;
    println!(
        "datasources: {} processed, {} failed",
        totals.datasources_processed, totals.datasources_failed
    );
    println!(
        "records: {} loaded, {} accepted, {} invalid, {} filtered, {} failed",
        totals.records_loaded, totals.accepted, totals.invalid, totals.filtered, totals.failed
    );
    println!(
        "datastore: {} written, {} lost in {} bulk inserts",
        totals.datastore.records_written, totals.datastore.records_lost, totals.datastore.bulk_inserts
    );

    for failure in &report.failures {
        error!(process = %failure.process, error = %failure.error, "Process failed");
    }
    if !report.is_success() {
        bail!("{} process definition(s) failed", report.failures.len());
    }

    info!("Ingestion complete");
    Ok(())
}

async fn discover(config: &Configuration, process: Option<&str>) -> Result<()> {
    let mut failed = 0;
    for (name, datasources) in producer::discover(config, &Registries::builtin(), process).await {
        match datasources {
            Ok(datasources) => {
                println!("{name}: {} datasource(s)", datasources.len());
                for datasource in datasources {
                    println!("  {datasource}");
                }
            },
            Err(e) => {
                failed += 1;
                println!("{name}: {e}");
            },
        }
    }
    if failed > 0 {
        bail!("{failed} process definition(s) could not be discovered");
    }
    Ok(())
}
