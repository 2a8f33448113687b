//! Queue consumer loop.
//!
//! Claims one message at a time and hands its job id to the orchestrator.
//! Idle consumers wake on a queue notification or after the poll interval.

use anyhow::Result;
use slidepipe_core::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;

use crate::orchestrator::JobOrchestrator;
use crate::queue::JobQueue;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub poll_interval_ms: u64,
    /// Deliveries beyond this count fail the job instead of running it again.
    pub max_deliveries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_deliveries: 3,
        }
    }
}

impl ConsumerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval_ms: config.queue_poll_interval_ms(),
            max_deliveries: config.queue_max_deliveries(),
        }
    }
}

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    orchestrator: JobOrchestrator,
    config: ConsumerConfig,
}

impl JobConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: JobOrchestrator,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            config,
        }
    }

    /// Claim and process at most one message.
    ///
    /// Returns `false` when the queue had nothing visible. A message is left
    /// unacknowledged only when the job store could not be reached, so it is
    /// redelivered after its visibility timeout.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(delivery) = self.queue.receive().await? else {
            return Ok(false);
        };

        let message = match delivery.message() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    message_id = delivery.id,
                    error = %e,
                    payload = %delivery.payload,
                    "Dropping undecodable job message"
                );
                self.queue.ack(&delivery).await?;
                return Ok(true);
            }
        };

        let result = if delivery.delivery_count > self.config.max_deliveries {
            self.orchestrator
                .abandon(&message.job_id, self.config.max_deliveries)
                .await
        } else {
            self.orchestrator.handle(&message.job_id).await
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    message_id = delivery.id,
                    job_id = %message.job_id,
                    delivery_count = delivery.delivery_count,
                    outcome = ?outcome,
                    "Job message handled"
                );
                self.queue.ack(&delivery).await?;
            }
            Err(e) => {
                tracing::error!(
                    message_id = delivery.id,
                    job_id = %message.job_id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "Job store unavailable, leaving message for redelivery"
                );
            }
        }
        Ok(true)
    }

    /// Consume until `shutdown_rx` fires or its sender is dropped.
    ///
    /// A job in progress is finished before the loop exits.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_deliveries = self.config.max_deliveries,
            "Job consumer started"
        );

        loop {
            match self.run_once().await {
                Ok(true) => {
                    if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job message");
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = self.queue.notified() => {}
                _ = sleep(poll_interval) => {}
            }
        }

        tracing::info!("Job consumer stopped");
    }
}
