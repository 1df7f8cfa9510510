use std::collections::HashMap;

use super::BatchProcessor;
use super::retry::{FailureKind, RetryDecision};
use crate::error::{ApiError, QueueError, is_permanent_status};
use crate::mailchimp::{BatchStatus, OperationResult};
use crate::models::{ItemUpdate, QueueItem, QueueStatus};
use crate::scheduler::{CompletionCheck, Job};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCounts {
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Still in flight; another check was scheduled.
    Rescheduled { next_attempt: u32 },
    Resolved(ResolvedCounts),
}

impl BatchProcessor {
    /// Deferred check of one submitted batch.
    pub async fn check_completion(
        &self,
        check: CompletionCheck,
    ) -> Result<CompletionOutcome, QueueError> {
        let status = self
            .with_timeout(self.api.get_batch_status(&check.batch_ref))
            .await;

        match status {
            Ok(BatchStatus::InFlight) => self.poll_again(check, "batch still in flight").await,
            Err(e) => {
                tracing::warn!(batch_ref = %check.batch_ref, error = %e, "Batch status check failed");
                self.poll_again(check, &e.to_string()).await
            }
            Ok(BatchStatus::Failure { reason }) => {
                tracing::error!(batch_ref = %check.batch_ref, reason = %reason, "Batch failed");
                let items = self.batch_items(&check).await?;
                let counts = self
                    .fail_all(&items, &format!("Batch failed: {reason}"))
                    .await?;
                Ok(CompletionOutcome::Resolved(counts))
            }
            Ok(BatchStatus::Success { result_url }) => {
                let results = match self.with_timeout(self.api.fetch_results(&result_url)).await {
                    Ok(results) => results,
                    Err(e) => {
                        tracing::warn!(batch_ref = %check.batch_ref, error = %e, "Failed to fetch batch results");
                        return self.poll_again(check, &e.to_string()).await;
                    }
                };
                let counts = self.apply_results(&check, results).await?;
                tracing::info!(
                    batch_ref = %check.batch_ref,
                    completed = counts.completed,
                    retrying = counts.retrying,
                    failed = counts.failed,
                    "Batch resolved"
                );
                Ok(CompletionOutcome::Resolved(counts))
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        match tokio::time::timeout(self.settings.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Transient(format!(
                "Request timed out after {}s",
                self.settings.request_timeout.as_secs()
            ))),
        }
    }

    /// Reschedule, or give up on the group once the poll cap is reached.
    async fn poll_again(
        &self,
        check: CompletionCheck,
        last_error: &str,
    ) -> Result<CompletionOutcome, QueueError> {
        if check.attempt >= self.settings.max_poll_attempts {
            tracing::error!(
                batch_ref = %check.batch_ref,
                attempts = check.attempt,
                "Batch did not complete, giving up on polling"
            );
            let items = self.batch_items(&check).await?;
            let counts = self
                .fail_all(
                    &items,
                    &format!(
                        "Batch {} did not complete after {} checks: {last_error}",
                        check.batch_ref, check.attempt
                    ),
                )
                .await?;
            return Ok(CompletionOutcome::Resolved(counts));
        }

        let next_attempt = check.attempt + 1;
        tracing::debug!(batch_ref = %check.batch_ref, next_attempt, "Batch not finished, checking later");
        self.scheduler
            .schedule_once(
                self.settings.poll_delay,
                Job::CheckCompletion(CompletionCheck {
                    attempt: next_attempt,
                    ..check
                }),
            )
            .await?;
        Ok(CompletionOutcome::Rescheduled { next_attempt })
    }

    async fn apply_results(
        &self,
        check: &CompletionCheck,
        results: Vec<OperationResult>,
    ) -> Result<ResolvedCounts, QueueError> {
        let by_operation: HashMap<&str, &OperationResult> = results
            .iter()
            .map(|r| (r.operation_id.as_str(), r))
            .collect();

        let mut counts = ResolvedCounts::default();
        for item in self.batch_items(check).await? {
            if item.status.is_terminal() {
                continue;
            }

            match by_operation.get(item.operation_id().as_str()) {
                Some(result) if result.is_success() => {
                    if self.mark_completed(&item).await? {
                        counts.completed += 1;
                    }
                }
                Some(result) => {
                    let kind = if is_permanent_status(result.status_code) {
                        FailureKind::Permanent
                    } else {
                        FailureKind::Transient
                    };
                    let decision = self
                        .record_failure(&item, &result.error_detail(), kind)
                        .await?;
                    tally(&mut counts, &decision);
                }
                None => {
                    // No result for this operation: treat as done rather than leave it hanging.
                    tracing::warn!(
                        item_id = %item.id,
                        batch_ref = %check.batch_ref,
                        "No result found for operation, marking completed"
                    );
                    if self.mark_completed(&item).await? {
                        counts.completed += 1;
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Items of the check that still belong to its batch. A row resubmitted
    /// since then carries a newer ref and is left to that batch's check.
    async fn batch_items(&self, check: &CompletionCheck) -> Result<Vec<QueueItem>, QueueError> {
        let items = self.store.find_by_ids(&check.item_ids).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.external_batch_ref.as_deref() == Some(check.batch_ref.as_str()))
            .collect())
    }

    async fn mark_completed(&self, item: &QueueItem) -> Result<bool, QueueError> {
        self.store
            .update_item(
                item.id,
                ItemUpdate {
                    status: Some(QueueStatus::Completed),
                    processed_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await
    }

    async fn fail_all(
        &self,
        items: &[QueueItem],
        message: &str,
    ) -> Result<ResolvedCounts, QueueError> {
        let mut counts = ResolvedCounts::default();
        for item in items {
            let decision = self
                .record_failure(item, message, FailureKind::Transient)
                .await?;
            tally(&mut counts, &decision);
        }
        Ok(counts)
    }
}

fn tally(counts: &mut ResolvedCounts, decision: &RetryDecision) {
    match decision {
        RetryDecision::Retrying { .. } => counts.retrying += 1,
        RetryDecision::Failed => counts.failed += 1,
        RetryDecision::AlreadyTerminal | RetryDecision::Missing => {}
    }
}
