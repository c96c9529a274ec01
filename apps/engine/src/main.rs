mod actuator;
mod archive;
mod browser;
mod cache;
mod cli;
mod config;
mod db;
mod engine;
mod errors;
mod intervention;
mod models;
mod oracle;
mod questions;
mod resolver;
mod state;
mod store;
mod strategy;

#[cfg(test)]
mod test_support;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{ApplyArgs, Cli, Command, ListArgs};
use crate::config::Config;
use crate::engine::BatchRunner;
use crate::intervention::{ConsoleResponder, InterventionController};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ATS engine v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::init(config).await?;

    match cli.command {
        Command::List(args) => list(&state, args).await,
        Command::Apply(args) => apply(&state, args).await,
    }
}

async fn list(state: &AppState, args: ListArgs) -> Result<()> {
    let jobs = state.store.list_eligible(args.limit).await?;
    if jobs.is_empty() {
        println!("No jobs are waiting for an application.");
    }
    for job in jobs {
        println!(
            "{:<24} {:<12} {}",
            job.primary_identifier,
            job.ats_type.as_deref().unwrap_or("-"),
            job.display_name()
        );
    }
    Ok(())
}

async fn apply(state: &AppState, args: ApplyArgs) -> Result<()> {
    let mut engine = state.engine();
    // Escalations need someone at the console to answer them.
    let attended = !args.no_intervention && (args.interactive || std::io::stdin().is_terminal());
    let mut console = attended.then(ConsoleResponder::stdio);

    let job_ids = match (&args.job_id, console.as_mut()) {
        (Some(id), _) => vec![id.clone()],
        (None, Some(console)) if args.interactive => {
            let jobs = state.store.list_eligible(state.config.max_jobs_per_run).await?;
            match console.choose_job(&jobs).await? {
                Some(index) => vec![jobs[index].primary_identifier.clone()],
                None => {
                    info!("No job selected");
                    return Ok(());
                }
            }
        }
        (None, _) => {
            let limit = args.queue_limit(state.config.max_jobs_per_run);
            info!("Fetching up to {limit} docs_ready jobs");
            state
                .store
                .list_eligible(limit)
                .await?
                .into_iter()
                .map(|job| job.primary_identifier)
                .collect()
        }
    };

    if job_ids.is_empty() {
        info!("No docs_ready jobs to apply to");
        return Ok(());
    }

    let controller = console.map(|console| {
        let (controller, tickets) = InterventionController::channel(1);
        tokio::spawn(async move {
            if let Err(e) = console.serve(tickets).await {
                warn!("Console responder stopped: {e}");
            }
        });
        Arc::new(controller)
    });
    match &controller {
        Some(controller) => engine = engine.with_intervention(controller.clone()),
        None => info!("No console attached; stopped jobs will be marked application_failed_ats"),
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current job before stopping");
            on_signal.cancel();
            let waiting = controller.map(|c| c.awaiting()).unwrap_or_default();
            if !waiting.is_empty() {
                warn!("Still waiting on a human for: {}", waiting.join(", "));
            }
        }
    });

    let workers = args.workers.unwrap_or(state.config.workers);
    let summary = BatchRunner::new(Arc::new(engine), workers, cancel)
        .run(job_ids)
        .await;

    print!("{}", summary.render());
    Ok(())
}
