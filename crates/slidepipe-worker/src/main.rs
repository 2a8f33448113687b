//! slidepipe-worker: consumes ingestion jobs, plus a few operator commands.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use slidepipe_core::Config;
use slidepipe_db::JobStore;
use slidepipe_infra::{init_telemetry, LogFormat};
use slidepipe_worker::setup::{build_context, setup_persistence};
use slidepipe_worker::{ConsumerConfig, JobConsumer, JobMessage, JobOrchestrator, JobQueue};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "slidepipe-worker", about = "Whole-slide ingestion worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume jobs until SIGINT or SIGTERM (default)
    Run,
    /// Publish a job id to the queue
    Enqueue {
        /// Job identifier
        job_id: String,
    },
    /// Reset a finished job to `ingested` and publish it again
    Reprocess {
        /// Job identifier
        job_id: String,
    },
    /// Print a job record as JSON
    Status {
        /// Job identifier
        job_id: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize job")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.validate()?;
    init_telemetry(LogFormat::from_setting(config.log_format()), config.environment())
        .map_err(|e| anyhow!("Failed to initialize telemetry: {}", e))?;

    let persistence = setup_persistence(&config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let context = build_context(&config, persistence.job_store.clone()).await?;
            let listener = persistence.queue.spawn_listener();
            let consumer = JobConsumer::new(
                persistence.queue.clone(),
                JobOrchestrator::new(context),
                ConsumerConfig::from_config(&config),
            );

            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(()).await;
            });

            tracing::info!(topic = %persistence.queue.topic(), "Worker ready");
            consumer.run(shutdown_rx).await;
            listener.abort();
        }
        Commands::Enqueue { job_id } => {
            let id = persistence.queue.publish(&JobMessage::new(&job_id)).await?;
            print_json(&serde_json::json!({ "job_id": job_id, "message_id": id }))?;
        }
        Commands::Reprocess { job_id } => {
            if !persistence.job_store.reset_for_reprocess(&job_id).await? {
                return Err(anyhow!(
                    "Job {} not found or still in progress; only finished jobs can be reprocessed",
                    job_id
                ));
            }
            let id = persistence.queue.publish(&JobMessage::new(&job_id)).await?;
            print_json(&serde_json::json!({
                "job_id": job_id,
                "message_id": id,
                "status": "ingested",
            }))?;
        }
        Commands::Status { job_id } => {
            let job = persistence
                .job_store
                .get_job(&job_id)
                .await?
                .ok_or_else(|| anyhow!("Job {} not found", job_id))?;
            print_json(&job)?;
        }
    }

    persistence.pool.close().await;
    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
///
/// A handler that cannot be installed is logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down after the current job...");
}
