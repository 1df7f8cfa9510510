pub mod client;
pub mod request;
pub mod results;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub use client::MailchimpClient;

/// One sub-operation of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub method: String,
    pub path: String,
    pub operation_id: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    InFlight,
    Success { result_url: String },
    Failure { reason: String },
}

/// Per-operation outcome from a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub response: Option<String>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }

    /// The provider's `detail`/`title` when the response is a problem document.
    pub fn error_detail(&self) -> String {
        let parsed = self
            .response
            .as_deref()
            .and_then(|body| serde_json::from_str::<serde_json::Value>(body).ok());

        let detail = parsed.as_ref().and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("title"))
                .and_then(|d| d.as_str())
                .map(str::to_string)
        });

        match detail {
            Some(detail) => format!("HTTP {}: {detail}", self.status_code),
            None => format!("HTTP {}", self.status_code),
        }
    }
}

/// The external asynchronous batch API.
#[async_trait]
pub trait BatchApiClient: Send + Sync {
    /// Submit operations as one batch; returns the provider's batch reference.
    async fn submit(&self, operations: &[BatchOperation]) -> Result<String, ApiError>;

    async fn get_batch_status(&self, batch_ref: &str) -> Result<BatchStatus, ApiError>;

    async fn fetch_results(&self, result_url: &str) -> Result<Vec<OperationResult>, ApiError>;
}
