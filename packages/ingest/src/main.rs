#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parking ticket ingestion tool.

use std::time::Duration;

use clap::{Parser, Subcommand};
use ticket_map_ingest::{
    Pipeline,
    config::{IngestConfig, parse_datasets},
    scheduler::{self, Schedule},
};
use ticket_map_ingest_models::{RunKind, SyncReport};
use ticket_map_source_models::Dataset;

#[derive(Parser)]
#[command(name = "ticket_map_ingest", about = "Parking ticket ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull an entire dataset, ordered by source row id
    Backfill {
        /// Dataset id (e.g., "nc67-uf89")
        dataset: Dataset,
    },
    /// Pull rows of a dataset updated since its stored cursor
    Sync {
        /// Dataset id (e.g., "pvqr-7yc4")
        dataset: Dataset,
    },
    /// Run every configured dataset once
    SyncAll {
        /// Comma-separated dataset ids (overrides `TICKETS_DATASETS`)
        #[arg(long)]
        datasets: Option<String>,
        /// `incremental` or `backfill`
        #[arg(long, default_value = "incremental")]
        mode: RunKind,
    },
    /// Show stored ticket counts and sync cursors
    Stats,
    /// List supported datasets
    Datasets,
    /// Run incremental cycles on a timer until SIGINT/SIGTERM
    Schedule {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (overrides `TICKETS_SYNC_INTERVAL_SECS`)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn print_report(report: &SyncReport) {
    println!(
        "{:<10} {:<12} pages={:<5} fetched={:<8} used={:<8} rejected={:<6} changed={:<8} cursor={}",
        report.dataset.id(),
        report.mode,
        report.pages,
        report.rows_fetched,
        report.rows_used,
        report.rows_rejected,
        report.rows_changed,
        match (report.cursor_advanced, report.watermark) {
            (true, Some(watermark)) => watermark.to_rfc3339(),
            _ => "unchanged".to_string(),
        }
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Datasets) {
        println!("{:<12} NAME", "ID");
        println!("{}", "-".repeat(60));
        for dataset in Dataset::ALL {
            println!("{:<12} {}", dataset.id(), dataset.name());
        }
        return Ok(());
    }

    let config = IngestConfig::from_env()?;

    let datasets = match &cli.command {
        Commands::SyncAll {
            datasets: Some(filter),
            ..
        } => parse_datasets(filter)?,
        _ => config.datasets.clone(),
    };

    let pipeline = Pipeline::connect(&config).await?;

    match cli.command {
        Commands::Datasets => {}
        Commands::Backfill { dataset } => {
            print_report(&pipeline.run_backfill(dataset).await?);
        }
        Commands::Sync { dataset } => {
            print_report(&pipeline.run_sync(dataset).await?);
        }
        Commands::SyncAll { mode, .. } => {
            let cycle = pipeline.run_cycle(&datasets, mode).await;
            for report in &cycle.succeeded {
                print_report(report);
            }
            for failure in &cycle.failed {
                println!("{:<10} FAILED: {}", failure.dataset.id(), failure.error);
            }
            if !cycle.is_clean() {
                return Err(format!("{} dataset(s) failed", cycle.failed.len()).into());
            }
        }
        Commands::Stats => {
            let stats = pipeline.get_stats().await?;
            let cursors = pipeline.store().cursors().await?;

            println!("Total tickets: {}", stats.total);
            println!();
            println!("{:<12} {:>12}  CURSOR", "DATASET", "TICKETS");
            println!("{}", "-".repeat(60));
            for dataset in Dataset::ALL {
                let cursor = cursors
                    .iter()
                    .find(|c| c.dataset_id == dataset.id())
                    .map_or_else(|| "-".to_string(), |c| c.last_updated_at.to_rfc3339());
                println!(
                    "{:<12} {:>12}  {cursor}",
                    dataset.id(),
                    stats.count_for(*dataset)
                );
            }
        }
        Commands::Schedule {
            once,
            interval_secs,
        } => {
            let schedule = Schedule {
                datasets,
                interval: interval_secs.map_or(config.sync_interval, Duration::from_secs),
                once,
            };
            let shutdown = scheduler::spawn_signal_listener();
            scheduler::run(pipeline, &schedule, shutdown).await;
        }
    }

    Ok(())
}
