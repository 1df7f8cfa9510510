use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::QueueError;

/// Continuation data for a completion check. Plain data so a durable
/// scheduler can persist it across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCheck {
    pub batch_ref: String,
    pub item_ids: Vec<Uuid>,
    /// 1 for the first check after submission.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    Dispatch,
    CheckCompletion(CompletionCheck),
}

/// One-shot deferred execution of a `Job`.
///
/// Implementations may coalesce `Job::Dispatch` requests while one is already pending.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_once(&self, delay: Duration, job: Job) -> Result<(), QueueError>;
}

/// Timer tasks on the current Tokio runtime that deliver due jobs to a channel
/// drained by the worker.
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Job>,
    dispatch_pending: Arc<AtomicBool>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                dispatch_pending: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule_once(&self, delay: Duration, job: Job) -> Result<(), QueueError> {
        if self.tx.is_closed() {
            return Err(QueueError::Scheduler("job channel closed".to_string()));
        }

        let is_dispatch = matches!(job, Job::Dispatch);
        if is_dispatch && self.dispatch_pending.swap(true, Ordering::AcqRel) {
            tracing::debug!("Dispatch tick already scheduled");
            return Ok(());
        }

        let tx = self.tx.clone();
        let dispatch_pending = self.dispatch_pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if is_dispatch {
                dispatch_pending.store(false, Ordering::Release);
            }
            if tx.send(job).is_err() {
                tracing::warn!("Scheduled job dropped: worker is not running");
            }
        });
        Ok(())
    }
}
