//! The batch queue engine.
//!
//! Items are enqueued as `pending`, claimed by a periodic dispatch tick,
//! submitted to the provider's batch API one (audience, operation type) group
//! at a time, and resolved by deferred completion checks. Every failure path
//! funnels into the per-item retry policy.

mod completion;
mod dispatch;
mod enqueue;
mod maintenance;
pub mod priority;
mod retry;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::QueueSettings;
use crate::error::QueueError;
use crate::lock::LeaseLock;
use crate::mailchimp::BatchApiClient;
use crate::scheduler::{Job, Scheduler};
use crate::store::QueueStore;

pub use completion::{CompletionOutcome, ResolvedCounts};
pub use dispatch::{DispatchOutcome, DispatchSummary};
pub use enqueue::EnqueueRequest;
pub use priority::PriorityInputs;
pub use retry::{FailureKind, RetryDecision};

/// Lease name guarding the dispatch loop.
pub const DISPATCH_LOCK: &str = "listqueue_dispatch";

pub struct BatchProcessor {
    store: Arc<dyn QueueStore>,
    api: Arc<dyn BatchApiClient>,
    scheduler: Arc<dyn Scheduler>,
    lock: Arc<dyn LeaseLock>,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        api: Arc<dyn BatchApiClient>,
        scheduler: Arc<dyn Scheduler>,
        lock: Arc<dyn LeaseLock>,
        clock: Arc<dyn Clock>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            store,
            api,
            scheduler,
            lock,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Execute a job delivered by the scheduler.
    pub async fn run_job(&self, job: Job) -> Result<(), QueueError> {
        match job {
            Job::Dispatch => self.run_dispatch_tick().await.map(|_| ()),
            Job::CheckCompletion(check) => self.check_completion(check).await.map(|_| ()),
        }
    }
}
