use std::time::Duration;

use chrono::{DateTime, Utc};

use super::BatchProcessor;
use super::retry::FailureKind;
use crate::error::QueueError;
use crate::models::{QueueStats, QueueStatus};

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl BatchProcessor {
    /// Delete completed and failed rows older than `retention`.
    pub async fn purge(&self, retention: Duration) -> Result<u64, QueueError> {
        let cutoff = before(self.clock.now(), retention);
        let purged = self
            .store
            .purge_older_than(&[QueueStatus::Completed, QueueStatus::Failed], cutoff)
            .await?;
        if purged > 0 {
            tracing::info!(purged, "Purged old queue items");
        }
        Ok(purged)
    }

    /// Counts for rows created within `window`; `None` covers the whole table.
    pub async fn get_statistics(&self, window: Option<Duration>) -> Result<QueueStats, QueueError> {
        let since = window.map(|w| before(self.clock.now(), w));
        let counts = self.store.count_by_status(since).await?;
        Ok(QueueStats::from_counts(counts))
    }

    /// Send rows stuck in `processing` back through the retry policy.
    pub(super) async fn reclaim_stale_processing(&self) -> Result<usize, QueueError> {
        let claimed_before = before(self.clock.now(), self.settings.stale_processing);
        let stale = self.store.find_stale_processing(claimed_before).await?;

        for item in &stale {
            self.record_failure(item, "Processing timed out", FailureKind::Transient)
                .await?;
        }
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Reclaimed stale processing items");
        }
        Ok(stale.len())
    }
}
