use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use uuid::Uuid;

use super::retry::FailureKind;
use super::{BatchProcessor, DISPATCH_LOCK};
use crate::error::{ApiError, QueueError};
use crate::mailchimp::request::build_operation;
use crate::models::{ItemUpdate, OperationType, QueueItem, QueueStatus};
use crate::scheduler::{CompletionCheck, Job};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Another tick holds the processing lease.
    Skipped,
    Ran(DispatchSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub audiences: usize,
    pub batches_submitted: usize,
    pub batches_rejected: usize,
    pub reclaimed: usize,
    /// Set when the lease could not be renewed and the tick stopped early.
    pub lease_lost: bool,
    /// Claimed rows handed back unsent after losing the lease.
    pub returned: usize,
}

/// Split rows by a key, keeping first-seen key order and the input order within each group.
fn partition_by<K, F>(items: Vec<QueueItem>, key: F) -> Vec<(K, Vec<QueueItem>)>
where
    K: Eq + std::hash::Hash + Clone,
    F: Fn(&QueueItem) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<QueueItem>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}

impl BatchProcessor {
    /// One pass of the dispatch loop. A no-op while another tick holds the lease.
    pub async fn run_dispatch_tick(&self) -> Result<DispatchOutcome, QueueError> {
        let holder = Uuid::now_v7();
        if !self
            .lock
            .try_acquire(DISPATCH_LOCK, holder, self.settings.lock_lease)
            .await?
        {
            tracing::debug!("Dispatch already running, skipping tick");
            return Ok(DispatchOutcome::Skipped);
        }

        let result = AssertUnwindSafe(self.dispatch_claimed(holder))
            .catch_unwind()
            .await;

        if let Err(e) = self.lock.release(DISPATCH_LOCK, holder).await {
            tracing::error!("Failed to release dispatch lease: {e}");
        }

        match result {
            Ok(summary) => summary.map(DispatchOutcome::Ran),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn dispatch_claimed(&self, holder: Uuid) -> Result<DispatchSummary, QueueError> {
        let mut summary = DispatchSummary {
            reclaimed: self.reclaim_stale_processing().await?,
            ..Default::default()
        };

        let items = self
            .store
            .select_pending_or_retrying(self.settings.max_batch_size)
            .await?;
        if items.is_empty() {
            return Ok(summary);
        }

        summary.claimed = items.len();

        // Every selected row is claimed before the first submission.
        let ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
        self.store
            .update_status(&ids, QueueStatus::Processing, self.clock.now())
            .await?;

        let partitions = partition_by(items, |item| item.audience_id.clone());
        summary.audiences = partitions.len();

        tracing::info!(
            claimed = summary.claimed,
            audiences = summary.audiences,
            "Dispatching queued operations"
        );

        let mut remaining = partitions.into_iter().enumerate();
        while let Some((i, (audience_id, items))) = remaining.next() {
            if i > 0 {
                if !self.settings.audience_pause.is_zero() {
                    tokio::time::sleep(self.settings.audience_pause).await;
                }

                if !self.renew_lease(holder).await {
                    let unsent: Vec<QueueItem> = items
                        .into_iter()
                        .chain(remaining.by_ref().flat_map(|(_, (_, items))| items))
                        .collect();
                    summary.lease_lost = true;
                    summary.returned = self.return_unsent(&unsent).await?;
                    tracing::warn!(
                        returned = summary.returned,
                        "Dispatch lease lost, stopping tick early"
                    );
                    break;
                }
            }

            for (operation_type, group) in partition_by(items, |item| item.operation_type) {
                if self
                    .submit_group(&audience_id, operation_type, group)
                    .await?
                {
                    summary.batches_submitted += 1;
                } else {
                    summary.batches_rejected += 1;
                }
            }
        }

        tracing::info!(
            submitted = summary.batches_submitted,
            rejected = summary.batches_rejected,
            "Dispatch tick finished"
        );

        Ok(summary)
    }

    async fn renew_lease(&self, holder: Uuid) -> bool {
        match self
            .lock
            .renew(DISPATCH_LOCK, holder, self.settings.lock_lease)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) => {
                tracing::error!("Failed to renew dispatch lease: {e}");
                false
            }
        }
    }

    /// Put claimed but unsubmitted rows back in the status they were selected with.
    async fn return_unsent(&self, items: &[QueueItem]) -> Result<usize, QueueError> {
        let mut returned = 0;
        for item in items {
            let restored = self
                .store
                .update_item(
                    item.id,
                    ItemUpdate {
                        status: Some(item.status),
                        ..Default::default()
                    },
                )
                .await?;
            if restored {
                returned += 1;
            }
        }
        Ok(returned)
    }

    /// Submit one (audience, operation type) group. Returns false when the batch was rejected.
    async fn submit_group(
        &self,
        audience_id: &str,
        operation_type: OperationType,
        group: Vec<QueueItem>,
    ) -> Result<bool, QueueError> {
        let mut operations = Vec::with_capacity(group.len());
        let mut submitted = Vec::with_capacity(group.len());
        for item in group {
            match item.operation() {
                Ok(operation) => {
                    operations.push(build_operation(&item, &operation));
                    submitted.push(item);
                }
                Err(e) => {
                    self.record_failure(
                        &item,
                        &format!("Invalid payload: {e}"),
                        FailureKind::Permanent,
                    )
                    .await?;
                }
            }
        }

        if operations.is_empty() {
            return Ok(true);
        }

        let result = match tokio::time::timeout(
            self.settings.request_timeout,
            self.api.submit(&operations),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Transient(format!(
                "Batch submission timed out after {}s",
                self.settings.request_timeout.as_secs()
            ))),
        };

        match result {
            Ok(batch_ref) => {
                for item in &submitted {
                    self.store
                        .update_item(
                            item.id,
                            ItemUpdate {
                                external_batch_ref: Some(batch_ref.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }

                tracing::info!(
                    audience_id,
                    operation = %operation_type,
                    batch_ref = %batch_ref,
                    operations = submitted.len(),
                    "Submitted batch"
                );

                let check = CompletionCheck {
                    batch_ref,
                    item_ids: submitted.iter().map(|item| item.id).collect(),
                    attempt: 1,
                };
                if let Err(e) = self
                    .scheduler
                    .schedule_once(self.settings.poll_delay, Job::CheckCompletion(check))
                    .await
                {
                    // Rows stay processing; the stale sweep recovers them.
                    tracing::error!("Failed to schedule completion check: {e}");
                }
                Ok(true)
            }
            Err(e) => {
                tracing::error!(
                    audience_id,
                    operation = %operation_type,
                    error = %e,
                    "Batch submission rejected"
                );
                let message = e.to_string();
                for item in &submitted {
                    self.record_failure(item, &message, FailureKind::Transient)
                        .await?;
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::Operation;

    fn item(audience: &str, operation: Operation) -> QueueItem {
        QueueItem {
            id: Uuid::now_v7(),
            batch_id: Uuid::now_v7(),
            source_id: "form".into(),
            audience_id: audience.into(),
            operation_type: operation.kind(),
            target_key: "a@b.co".into(),
            payload: serde_json::to_value(&operation).unwrap(),
            status: QueueStatus::Pending,
            priority: 0,
            retry_count: 0,
            error_message: None,
            external_batch_ref: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn partitions_keep_first_seen_order() {
        let rows = vec![
            item("b", Operation::Unsubscribe),
            item("a", Operation::Unsubscribe),
            item("b", Operation::Unsubscribe),
            item("a", Operation::Unsubscribe),
        ];
        let expected_b = vec![rows[0].id, rows[2].id];
        let expected_a = vec![rows[1].id, rows[3].id];

        let groups = partition_by(rows, |r| r.audience_id.clone());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1.iter().map(|r| r.id).collect::<Vec<_>>(), expected_b);
        assert_eq!(groups[1].1.iter().map(|r| r.id).collect::<Vec<_>>(), expected_a);
    }

    #[test]
    fn partitions_by_operation_type() {
        let rows = vec![
            item("a", Operation::Unsubscribe),
            item(
                "a",
                Operation::Update {
                    merge_fields: Default::default(),
                },
            ),
            item("a", Operation::Unsubscribe),
        ];
        let groups = partition_by(rows, |r| r.operation_type);
        assert_eq!(groups[0].0, OperationType::Unsubscribe);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, OperationType::Update);
    }
}
