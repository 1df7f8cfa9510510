use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::QueueStore;
use crate::clock::Clock;
use crate::db;
use crate::error::QueueError;
use crate::models::{ItemUpdate, NewQueueItem, QueueItem, QueueStatus};

pub struct PgQueueStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, QueueError> {
        let payload = serde_json::to_value(&item.operation)?;
        let row = db::queue_items::insert(&self.pool, &item, &payload, self.clock.now()).await?;
        Ok(row)
    }

    async fn select_pending_or_retrying(&self, limit: i64) -> Result<Vec<QueueItem>, QueueError> {
        Ok(db::queue_items::select_pending_or_retrying(&self.pool, limit).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<QueueItem>, QueueError> {
        Ok(db::queue_items::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QueueItem>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(db::queue_items::find_by_ids(&self.pool, ids).await?)
    }

    async fn update_status(
        &self,
        ids: &[Uuid],
        status: QueueStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(db::queue_items::update_status(&self.pool, ids, status, processed_at).await?)
    }

    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<bool, QueueError> {
        Ok(db::queue_items::update_item(&self.pool, id, &update).await?)
    }

    async fn purge_older_than(
        &self,
        statuses: &[QueueStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        Ok(db::queue_items::purge_older_than(&self.pool, statuses, cutoff).await?)
    }

    async fn count_by_status(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<QueueStatus, i64>, QueueError> {
        let rows = db::queue_items::count_by_status(&self.pool, since).await?;
        Ok(rows.into_iter().collect())
    }

    async fn find_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        Ok(db::queue_items::find_stale_processing(&self.pool, claimed_before).await?)
    }
}
