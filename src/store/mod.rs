pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{ItemUpdate, NewQueueItem, QueueItem, QueueStatus};

pub use memory::MemoryQueueStore;
pub use postgres::PgQueueStore;

/// Durable table of queue rows.
///
/// Every mutation is a single-row or bulk-by-id update and never touches a row
/// that is already `completed` or `failed`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new `pending` row.
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, QueueError>;

    /// Up to `limit` pending/retrying rows, priority descending then creation time ascending.
    async fn select_pending_or_retrying(&self, limit: i64) -> Result<Vec<QueueItem>, QueueError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<QueueItem>, QueueError>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QueueItem>, QueueError>;

    /// Returns the number of rows changed.
    async fn update_status(
        &self,
        ids: &[Uuid],
        status: QueueStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<u64, QueueError>;

    /// Returns false when the row is missing or terminal.
    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<bool, QueueError>;

    /// Delete rows in `statuses` created before `cutoff`.
    async fn purge_older_than(
        &self,
        statuses: &[QueueStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, QueueError>;

    /// Row counts per status, optionally limited to rows created at or after `since`.
    async fn count_by_status(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<QueueStatus, i64>, QueueError>;

    /// Rows still `processing` that were claimed before `claimed_before`.
    async fn find_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError>;
}
