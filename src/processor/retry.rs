use uuid::Uuid;

use super::BatchProcessor;
use crate::error::QueueError;
use crate::models::{ItemUpdate, QueueItem, QueueStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth trying again: network, timeout, 5xx, rate limiting, batch-level failure.
    Transient,
    /// The provider rejected this item's request itself (4xx).
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retrying { retry_count: i32 },
    Failed,
    AlreadyTerminal,
    Missing,
}

impl BatchProcessor {
    /// Record a failed attempt for one item.
    pub async fn handle_item_error(
        &self,
        item_id: Uuid,
        error_message: &str,
        kind: FailureKind,
    ) -> Result<RetryDecision, QueueError> {
        match self.store.find_by_id(item_id).await? {
            Some(item) => self.record_failure(&item, error_message, kind).await,
            None => Ok(RetryDecision::Missing),
        }
    }

    pub(super) async fn record_failure(
        &self,
        item: &QueueItem,
        error_message: &str,
        kind: FailureKind,
    ) -> Result<RetryDecision, QueueError> {
        if item.status.is_terminal() {
            return Ok(RetryDecision::AlreadyTerminal);
        }

        let next_attempt = item.retry_count + 1;
        let give_up = next_attempt > self.settings.max_retries
            || (kind == FailureKind::Permanent && self.settings.fail_fast_on_permanent);

        let (update, decision) = if give_up {
            (
                ItemUpdate {
                    status: Some(QueueStatus::Failed),
                    error_message: Some(error_message.to_string()),
                    processed_at: Some(self.clock.now()),
                    ..Default::default()
                },
                RetryDecision::Failed,
            )
        } else {
            (
                ItemUpdate {
                    status: Some(QueueStatus::Retrying),
                    retry_count: Some(next_attempt),
                    error_message: Some(error_message.to_string()),
                    processed_at: Some(self.clock.now()),
                    ..Default::default()
                },
                RetryDecision::Retrying {
                    retry_count: next_attempt,
                },
            )
        };

        if !self.store.update_item(item.id, update).await? {
            // Resolved concurrently.
            return Ok(RetryDecision::AlreadyTerminal);
        }

        match decision {
            RetryDecision::Failed => tracing::error!(
                item_id = %item.id,
                audience_id = %item.audience_id,
                retry_count = item.retry_count,
                error = error_message,
                "Queue item failed permanently"
            ),
            _ => tracing::warn!(
                item_id = %item.id,
                audience_id = %item.audience_id,
                retry_count = next_attempt,
                error = error_message,
                "Queue item will be retried"
            ),
        }

        Ok(decision)
    }
}
