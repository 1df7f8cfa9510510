use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::QueueStore;
use crate::clock::Clock;
use crate::error::QueueError;
use crate::models::{ItemUpdate, NewQueueItem, QueueItem, QueueStatus};

/// In-process queue store. Rows live only as long as the process.
pub struct MemoryQueueStore {
    // Kept in insertion order so equal (priority, created_at) keys stay FIFO.
    rows: Mutex<Vec<QueueItem>>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn all(&self) -> Vec<QueueItem> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, QueueError> {
        let payload = serde_json::to_value(&item.operation)?;
        let row = QueueItem {
            id: Uuid::now_v7(),
            batch_id: item.batch_id,
            source_id: item.source_id,
            audience_id: item.audience_id,
            operation_type: item.operation.kind(),
            target_key: item.target_key,
            payload,
            status: QueueStatus::Pending,
            priority: item.priority,
            retry_count: 0,
            error_message: None,
            external_batch_ref: None,
            created_at: self.clock.now(),
            processed_at: None,
        };
        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn select_pending_or_retrying(&self, limit: i64) -> Result<Vec<QueueItem>, QueueError> {
        let rows = self.rows.lock().await;
        let mut claimable: Vec<QueueItem> = rows
            .iter()
            .filter(|r| r.status.is_claimable())
            .cloned()
            .collect();
        // Stable sort keeps insertion order for ties.
        claimable.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        claimable.truncate(limit.max(0) as usize);
        Ok(claimable)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<QueueItem>, QueueError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QueueItem>, QueueError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|r| ids.contains(&r.id)).cloned().collect())
    }

    async fn update_status(
        &self,
        ids: &[Uuid],
        status: QueueStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut rows = self.rows.lock().await;
        let mut changed = 0;
        for row in rows
            .iter_mut()
            .filter(|r| ids.contains(&r.id) && !r.status.is_terminal())
        {
            row.status = status;
            row.processed_at = Some(processed_at);
            changed += 1;
        }
        Ok(changed)
    }

    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && !r.status.is_terminal())
        else {
            return Ok(false);
        };

        if let Some(status) = update.status {
            row.status = status;
        }
        if let Some(retry_count) = update.retry_count {
            row.retry_count = retry_count;
        }
        if let Some(error_message) = update.error_message {
            row.error_message = Some(error_message);
        }
        if let Some(batch_ref) = update.external_batch_ref {
            row.external_batch_ref = Some(batch_ref);
        }
        if let Some(processed_at) = update.processed_at {
            row.processed_at = Some(processed_at);
        }
        Ok(true)
    }

    async fn purge_older_than(
        &self,
        statuses: &[QueueStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|r| !(statuses.contains(&r.status) && r.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn count_by_status(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<QueueStatus, i64>, QueueError> {
        let rows = self.rows.lock().await;
        let mut counts = HashMap::new();
        for row in rows
            .iter()
            .filter(|r| since.is_none_or(|since| r.created_at >= since))
        {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_stale_processing(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| {
                r.status == QueueStatus::Processing
                    && r.processed_at.is_some_and(|at| at < claimed_before)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Operation;

    fn new_item(audience: &str, email: &str, priority: i32) -> NewQueueItem {
        NewQueueItem {
            batch_id: Uuid::now_v7(),
            source_id: "form-1".to_string(),
            audience_id: audience.to_string(),
            target_key: email.to_string(),
            operation: Operation::Unsubscribe,
            priority,
        }
    }

    #[tokio::test]
    async fn selection_orders_by_priority_then_age() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryQueueStore::new(clock.clone());

        let low_old = store.insert(new_item("a", "1@x.io", 0)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let high = store.insert(new_item("a", "2@x.io", 20)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let low_new = store.insert(new_item("a", "3@x.io", 0)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let mid = store.insert(new_item("a", "4@x.io", 10)).await.unwrap();

        let ids: Vec<Uuid> = store
            .select_pending_or_retrying(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![high.id, mid.id, low_old.id, low_new.id]);

        let limited = store.select_pending_or_retrying(2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn terminal_rows_are_never_updated() {
        let store = MemoryQueueStore::new(Arc::new(ManualClock::default()));
        let row = store.insert(new_item("a", "x@x.io", 0)).await.unwrap();

        let now = Utc::now();
        store
            .update_status(&[row.id], QueueStatus::Completed, now)
            .await
            .unwrap();

        let changed = store
            .update_status(&[row.id], QueueStatus::Processing, now)
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let updated = store
            .update_item(
                row.id,
                ItemUpdate {
                    status: Some(QueueStatus::Retrying),
                    retry_count: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated);

        let row = store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Completed);
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn purge_only_removes_old_terminal_rows() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryQueueStore::new(clock.clone());
        let start = clock.now();

        clock.set(start - chrono::Duration::days(40));
        let done = store.insert(new_item("a", "old@x.io", 0)).await.unwrap();
        let waiting = store.insert(new_item("a", "wait@x.io", 0)).await.unwrap();
        store
            .update_status(&[done.id], QueueStatus::Completed, clock.now())
            .await
            .unwrap();
        clock.set(start);

        let purged = store
            .purge_older_than(
                &[QueueStatus::Completed, QueueStatus::Failed],
                start - chrono::Duration::days(30),
            )
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store.find_by_id(done.id).await.unwrap().is_none());
        assert!(store.find_by_id(waiting.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn counts_respect_window() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryQueueStore::new(clock.clone());
        let start = clock.now();

        clock.set(start - chrono::Duration::days(2));
        store.insert(new_item("a", "old@x.io", 0)).await.unwrap();
        clock.set(start);
        store.insert(new_item("a", "new@x.io", 0)).await.unwrap();

        let all = store.count_by_status(None).await.unwrap();
        assert_eq!(all.get(&QueueStatus::Pending), Some(&2));

        let recent = store
            .count_by_status(Some(start - chrono::Duration::hours(24)))
            .await
            .unwrap();
        assert_eq!(recent.get(&QueueStatus::Pending), Some(&1));
    }
}
