use anyhow::{Context, Result};
use async_trait::async_trait;
use slidepipe_core::constants::JOB_NOTIFY_CHANNEL;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{Delivery, JobMessage, JobQueue};

/// Job queue over the `job_messages` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of consumers can share
/// a topic. Publishers `NOTIFY` on [`JOB_NOTIFY_CHANNEL`] with the topic as
/// payload to wake idle consumers; polling covers missed notifications.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    topic: String,
    visibility_timeout: Duration,
    wakeup: Arc<Notify>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, topic: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            topic: topic.into(),
            visibility_timeout,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Spawn the LISTEN loop that wakes [`JobQueue::notified`] waiters.
    ///
    /// Reconnects every 5 seconds while the database is unreachable.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let topic = self.topic.clone();
        let wakeup = self.wakeup.clone();

        tokio::spawn(async move {
            loop {
                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        tracing::debug!(channel = JOB_NOTIFY_CHANNEL, "Listening for new jobs");
                        while let Ok(notification) = listener.recv().await {
                            if notification.payload() == topic {
                                wakeup.notify_one();
                            }
                        }
                        tracing::warn!("Job listener connection lost, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[tracing::instrument(skip(self), fields(db.table = "job_messages", db.operation = "insert", job_id = %message.job_id))]
    async fn publish(&self, message: &JobMessage) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        let id = sqlx::query_scalar::<Postgres, i64>(
            "INSERT INTO job_messages (topic, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(&self.topic)
        .bind(Json(message))
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert job message")?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(&self.topic)
            .execute(&mut *tx)
            .await
            .context("Failed to notify consumers")?;

        tx.commit()
            .await
            .context("Failed to commit job message")?;

        tracing::info!(message_id = id, topic = %self.topic, "Job message published");
        Ok(id)
    }

    #[tracing::instrument(skip(self), fields(db.table = "job_messages", db.operation = "update"))]
    async fn receive(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<Postgres, (i64, serde_json::Value, i32)>(
            r#"
            UPDATE job_messages
            SET visible_at = NOW() + make_interval(secs => $2),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM job_messages
                WHERE topic = $1 AND visible_at <= NOW()
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, delivery_count
            "#,
        )
        .bind(&self.topic)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim job message")?;

        Ok(row.map(|(id, payload, delivery_count)| Delivery {
            id,
            payload,
            delivery_count: delivery_count.max(0) as u32,
        }))
    }

    #[tracing::instrument(skip(self, delivery), fields(db.table = "job_messages", db.operation = "delete", message_id = delivery.id))]
    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("DELETE FROM job_messages WHERE id = $1")
            .bind(delivery.id)
            .execute(&self.pool)
            .await
            .context("Failed to acknowledge job message")?;
        Ok(())
    }

    async fn notified(&self) {
        self.wakeup.notified().await;
    }
}
