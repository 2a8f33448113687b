use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use super::{Delivery, JobMessage, JobQueue};

struct Entry {
    id: i64,
    payload: serde_json::Value,
    visible_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<Entry>,
}

/// Process-local queue with the same visibility semantics as [`super::PgJobQueue`].
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
    wakeup: Notify,
}

impl InMemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory job queue lock poisoned"))
    }

    /// Messages not yet acknowledged, claimed or not.
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish an arbitrary payload, bypassing [`JobMessage`].
    pub fn publish_raw(&self, payload: serde_json::Value) -> Result<i64> {
        let id = {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = state.next_id;
            state.entries.push(Entry {
                id,
                payload,
                visible_at: Instant::now(),
                delivery_count: 0,
            });
            id
        };
        self.wakeup.notify_one();
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, message: &JobMessage) -> Result<i64> {
        self.publish_raw(serde_json::to_value(message)?)
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| entry.visible_at <= now)
        else {
            return Ok(None);
        };

        entry.visible_at = now + self.visibility_timeout;
        entry.delivery_count += 1;
        Ok(Some(Delivery {
            id: entry.id,
            payload: entry.payload.clone(),
            delivery_count: entry.delivery_count,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.lock()?.entries.retain(|entry| entry.id != delivery.id);
        Ok(())
    }

    async fn notified(&self) {
        self.wakeup.notified().await;
    }
}
