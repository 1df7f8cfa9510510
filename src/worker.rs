use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::processor::BatchProcessor;
use crate::scheduler::Job;

const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Start the queue worker on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled.
pub fn run_pool(
    processor: Arc<BatchProcessor>,
    jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: watch::Receiver<bool>,
    worker_threads: usize,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("queue-worker".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_threads.max(1))
                .thread_name("queue-worker")
                .enable_all()
                .build()
                .expect("Failed to build worker runtime");

            runtime.block_on(run(processor, jobs, shutdown));
        })
        .expect("Failed to spawn worker thread")
}

/// Recurring dispatch and purge timers plus scheduled jobs, until shutdown.
pub async fn run(
    processor: Arc<BatchProcessor>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    let settings = processor.settings().clone();

    let mut dispatch = tokio::time::interval(settings.dispatch_interval);
    dispatch.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut purge = tokio::time::interval(PURGE_INTERVAL);
    purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut running = JoinSet::new();

    tracing::info!(
        interval_secs = settings.dispatch_interval.as_secs(),
        "Queue worker started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = dispatch.tick() => spawn_job(&mut running, &processor, Job::Dispatch),
            _ = purge.tick() => {
                let processor = processor.clone();
                let retention = settings.retention;
                running.spawn(async move {
                    if let Err(e) = processor.purge(retention).await {
                        tracing::error!("Queue purge failed: {e}");
                    }
                });
            }
            job = jobs.recv() => match job {
                Some(job) => spawn_job(&mut running, &processor, job),
                None => break,
            },
            Some(done) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = done {
                    tracing::error!("Queue job panicked: {e}");
                }
            }
            _ = shutdown.changed() => {}
        }
    }

    tracing::info!(in_flight = running.len(), "Queue worker stopping");
    let drain = async { while running.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("Queue jobs still running after grace period, aborting");
    }

    tracing::info!("Queue worker stopped");
}

fn spawn_job(running: &mut JoinSet<()>, processor: &Arc<BatchProcessor>, job: Job) {
    let processor = processor.clone();
    running.spawn(async move {
        let label = match &job {
            Job::Dispatch => "dispatch".to_string(),
            Job::CheckCompletion(check) => format!("completion check {}", check.batch_ref),
        };
        if let Err(e) = processor.run_job(job).await {
            tracing::error!("Queue job {label} failed: {e}");
        }
    });
}
