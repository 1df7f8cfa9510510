use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use super::BatchProcessor;
use super::priority::{self, PriorityInputs};
use crate::error::QueueError;
use crate::models::{NewQueueItem, Operation, QueueStatus};
use crate::scheduler::Job;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

// Audience ids are interpolated into the provider's resource path.
static AUDIENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub source_id: String,
    pub audience_id: String,
    pub target_key: String,
    pub operation: Operation,
    pub priority: PriorityInputs,
}

impl BatchProcessor {
    /// Validate and queue one operation. Nothing is written when validation fails.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<Uuid, QueueError> {
        if !self.settings.enabled {
            return Err(QueueError::Disabled);
        }

        let audience_id = req.audience_id.trim();
        if audience_id.is_empty() {
            return Err(QueueError::Validation("audience_id is required".to_string()));
        }
        if !AUDIENCE_RE.is_match(audience_id) {
            return Err(QueueError::Validation(format!(
                "invalid audience_id: {audience_id}"
            )));
        }

        let target_key = req.target_key.trim();
        if !EMAIL_RE.is_match(target_key) {
            return Err(QueueError::Validation(format!(
                "invalid email address: {target_key}"
            )));
        }

        let priority = priority::compute(req.priority, &req.source_id, &self.settings.vip_sources);

        let item = self
            .store
            .insert(NewQueueItem {
                batch_id: Uuid::now_v7(),
                source_id: req.source_id,
                audience_id: audience_id.to_string(),
                target_key: target_key.to_string(),
                operation: req.operation,
                priority,
            })
            .await?;

        tracing::info!(
            item_id = %item.id,
            audience_id = %item.audience_id,
            operation = %item.operation_type,
            priority,
            "Queued list operation"
        );

        self.maybe_schedule_quick_dispatch().await;

        Ok(item.id)
    }

    /// Small queues get a near-term tick instead of waiting for the regular interval.
    async fn maybe_schedule_quick_dispatch(&self) {
        let pending = match self.store.count_by_status(None).await {
            Ok(counts) => counts.get(&QueueStatus::Pending).copied().unwrap_or(0),
            Err(e) => {
                tracing::warn!("Failed to count pending items: {e}");
                return;
            }
        };

        if pending > self.settings.small_queue_threshold {
            return;
        }

        if let Err(e) = self
            .scheduler
            .schedule_once(self.settings.quick_dispatch_delay, Job::Dispatch)
            .await
        {
            tracing::warn!("Failed to schedule quick dispatch: {e}");
        }
    }
}
