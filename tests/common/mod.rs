#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use listqueue::clock::{Clock, ManualClock};
use listqueue::config::{Config, MailchimpConfig, QueueSettings};
use listqueue::error::{ApiError, QueueError};
use listqueue::lock::MemoryLeaseLock;
use listqueue::mailchimp::{BatchApiClient, BatchOperation, BatchStatus, OperationResult};
use listqueue::models::{Operation, QueueItem};
use listqueue::processor::{BatchProcessor, EnqueueRequest, PriorityInputs};
use listqueue::scheduler::{Job, Scheduler};
use listqueue::state::AppState;
use listqueue::store::{MemoryQueueStore, QueueStore};

/// Scripted stand-in for the provider's batch API.
#[derive(Default)]
pub struct FakeBatchApi {
    submissions: Mutex<Vec<Vec<BatchOperation>>>,
    rejected_audiences: Mutex<HashSet<String>>,
    statuses: Mutex<HashMap<String, BatchStatus>>,
    results: Mutex<HashMap<String, Vec<OperationResult>>>,
    submit_delay: Mutex<Option<Duration>>,
}

impl FakeBatchApi {
    pub fn submissions(&self) -> Vec<Vec<BatchOperation>> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn reject_audience(&self, audience_id: &str) {
        self.rejected_audiences
            .lock()
            .unwrap()
            .insert(audience_id.to_string());
    }

    pub fn set_status(&self, batch_ref: &str, status: BatchStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(batch_ref.to_string(), status);
    }

    /// Mark `batch_ref` finished with the given per-operation results.
    pub fn finish(&self, batch_ref: &str, results: Vec<OperationResult>) {
        let url = format!("https://results.test/{batch_ref}.tar.gz");
        self.results.lock().unwrap().insert(url.clone(), results);
        self.set_status(batch_ref, BatchStatus::Success { result_url: url });
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl BatchApiClient for FakeBatchApi {
    async fn submit(&self, operations: &[BatchOperation]) -> Result<String, ApiError> {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = {
            let audiences = self.rejected_audiences.lock().unwrap();
            operations.iter().any(|op| {
                audiences
                    .iter()
                    .any(|aud| op.path.starts_with(&format!("/lists/{aud}/")))
            })
        };
        if rejected {
            return Err(ApiError::Permanent {
                status: 400,
                message: "Invalid Resource".to_string(),
            });
        }

        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(operations.to_vec());
        Ok(format!("b{}", submissions.len()))
    }

    async fn get_batch_status(&self, batch_ref: &str) -> Result<BatchStatus, ApiError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(batch_ref)
            .cloned()
            .unwrap_or(BatchStatus::InFlight))
    }

    async fn fetch_results(&self, result_url: &str) -> Result<Vec<OperationResult>, ApiError> {
        self.results
            .lock()
            .unwrap()
            .get(result_url)
            .cloned()
            .ok_or_else(|| ApiError::Transient("results not found".to_string()))
    }
}

/// Records scheduled jobs instead of running timers.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<VecDeque<(Duration, Job)>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<(Duration, Job)> {
        self.jobs.lock().unwrap().drain(..).collect()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule_once(&self, delay: Duration, job: Job) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().push_back((delay, job));
        Ok(())
    }
}

pub fn test_settings() -> QueueSettings {
    QueueSettings {
        audience_pause: Duration::ZERO,
        ..QueueSettings::default()
    }
}

/// A processor wired to in-memory collaborators.
pub struct Harness {
    pub processor: Arc<BatchProcessor>,
    pub store: Arc<MemoryQueueStore>,
    pub api: Arc<FakeBatchApi>,
    pub scheduler: Arc<RecordingScheduler>,
    pub lock: Arc<MemoryLeaseLock>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(settings: QueueSettings) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryQueueStore::new(clock.clone()));
        let api = Arc::new(FakeBatchApi::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let lock = Arc::new(MemoryLeaseLock::new(clock.clone()));

        let processor = Arc::new(BatchProcessor::new(
            store.clone(),
            api.clone(),
            scheduler.clone(),
            lock.clone(),
            clock.clone(),
            settings,
        ));

        Self {
            processor,
            store,
            api,
            scheduler,
            lock,
            clock,
        }
    }

    pub async fn subscribe(&self, audience_id: &str, email: &str, priority: PriorityInputs) -> Uuid {
        self.processor
            .enqueue(EnqueueRequest {
                source_id: "contact-form".to_string(),
                audience_id: audience_id.to_string(),
                target_key: email.to_string(),
                operation: Operation::Subscribe {
                    merge_fields: Default::default(),
                    tags: Vec::new(),
                    double_opt_in: priority.double_opt_in,
                },
                priority,
            })
            .await
            .expect("enqueue failed")
    }

    pub async fn item(&self, id: Uuid) -> QueueItem {
        self.store
            .find_by_id(id)
            .await
            .unwrap()
            .expect("queue item missing")
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// A running test server backed by an in-memory queue.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub harness: Harness,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

pub fn test_config(settings: QueueSettings, api_token: Option<&str>) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        api_token: api_token.map(str::to_string),
        mailchimp: MailchimpConfig {
            api_key: "test-us1".to_string(),
            base_url: "http://127.0.0.1:0".to_string(),
        },
        queue: settings,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_settings(), None).await
}

pub async fn spawn_app_with(settings: QueueSettings, api_token: Option<&str>) -> TestApp {
    let config = test_config(settings.clone(), api_token);
    let harness = Harness::new(settings);

    let state = Arc::new(AppState {
        config,
        processor: harness.processor.clone(),
    });
    let app = listqueue::build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        harness,
    }
}
