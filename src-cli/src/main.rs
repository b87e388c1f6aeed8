//! Trackfetch - download, convert and tag tracks from the command line.
//!
//! The binary owns the caller side of the pipeline: it submits requests to
//! the worker pool, drains job events on the main task, keeps the job
//! registry and hands completed tracks to the catalog.

mod cli;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use tokio::runtime::Builder;
use tracing::{error, info, warn};
use trackfetch_core::{
    CatalogStore, DownloadPool, JobDeps, JobEvent, JobOutcome, JobRegistry, MemoryCatalog,
    ProgressEvent, SongRecord,
};

use cli::{Cli, CliError};
use logging::LoggingConfig;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    let _guard = match logging::init(&logging_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, CliError> {
    let config = cli.load_config()?;
    let requests = cli.command.requests(&config)?;

    let runtime = Builder::new_multi_thread()
        .thread_name("trackfetch-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let deps = JobDeps::from_config(&config);
        let (pool, mut events) = DownloadPool::new(config.pool.clone(), deps);
        let mut registry = JobRegistry::new();
        let mut catalog = MemoryCatalog::new();
        let mut failures = 0_usize;

        for request in requests {
            match pool.submit(request.clone()) {
                Ok(id) => registry.register(id, request),
                Err(e) => {
                    eprintln!("skipped '{}': {e}", request.title);
                    failures += 1;
                }
            }
        }
        info!("{} job(s) submitted", registry.len());

        while !registry.is_empty() {
            let Some(event) = events.recv().await else {
                warn!("Event channel closed with {} job(s) pending", registry.len());
                failures += registry.len();
                break;
            };

            if let JobEvent::Progress(progress) = &event {
                print_progress(progress);
            }

            match registry.apply(&event) {
                Some(JobOutcome::Completed(track)) => {
                    println!("done      {}", track.file_path.display());
                    if let Err(e) = SongRecord::from_completed(&track)
                        .and_then(|record| catalog.insert_song(record))
                    {
                        warn!("Could not catalog {}: {}", track.file_path.display(), e);
                    }
                }
                Some(JobOutcome::Failed(failure)) => {
                    failures += 1;
                    let label = failure.track_id.as_deref().unwrap_or("-");
                    println!("failed    [{label}] {} ({})", failure.message, failure.kind);
                }
                None => {}
            }
        }

        pool.shutdown().await;
        print_summary(&catalog, failures);
        Ok(failures == 0)
    })
}

fn print_progress(progress: &ProgressEvent) {
    let label = progress.track_id.as_deref().unwrap_or("-");
    match progress.percentage {
        Some(percentage) => println!("{:<9} [{label}] {percentage:5.1}%", progress.phase.to_string()),
        None => println!("{:<9} [{label}]", progress.phase.to_string()),
    }
}

fn print_summary(catalog: &MemoryCatalog, failures: usize) {
    println!();
    println!("{} track(s) added, {} failed", catalog.len(), failures);
    for song in catalog.summaries() {
        let cover = if song.has_cover { "cover" } else { "no cover" };
        println!("  {} ({cover}) -> {}", song.title, song.path.display());
    }
}
