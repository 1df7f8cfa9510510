use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::results::parse_archive;
use super::{BatchApiClient, BatchOperation, BatchStatus, OperationResult};
use crate::config::MailchimpConfig;
use crate::error::ApiError;

/// Mailchimp Marketing API batch endpoints over HTTP basic auth.
pub struct MailchimpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct WireOperation<'a> {
    method: &'a str,
    path: &'a str,
    operation_id: &'a str,
    // The batch API expects each body as a JSON-encoded string.
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    operations: Vec<WireOperation<'a>>,
}

#[derive(Deserialize)]
struct BatchResponse {
    id: String,
    status: String,
    #[serde(default)]
    response_body_url: Option<String>,
    #[serde(default)]
    errored_operations: Option<u64>,
}

impl MailchimpClient {
    pub fn new(config: &MailchimpConfig, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transient(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_from(resp: reqwest::Response) -> ApiError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.chars().take(512).collect());
        ApiError::from_status(status, detail)
    }
}

#[async_trait]
impl BatchApiClient for MailchimpClient {
    async fn submit(&self, operations: &[BatchOperation]) -> Result<String, ApiError> {
        let operations = operations
            .iter()
            .map(|op| {
                Ok(WireOperation {
                    method: &op.method,
                    path: &op.path,
                    operation_id: &op.operation_id,
                    body: op.body.as_ref().map(|b| serde_json::to_string(b)).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()
            .map_err(|e| ApiError::Malformed(format!("Unencodable operation body: {e}")))?;

        let resp = self
            .client
            .post(self.url("/batches"))
            .basic_auth("listqueue", Some(&self.api_key))
            .json(&BatchRequest { operations })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }

        let batch: BatchResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("Invalid batch response: {e}")))?;
        Ok(batch.id)
    }

    async fn get_batch_status(&self, batch_ref: &str) -> Result<BatchStatus, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!("/batches/{batch_ref}")))
            .basic_auth("listqueue", Some(&self.api_key))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }

        let batch: BatchResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Malformed(format!("Invalid batch response: {e}")))?;

        let status = match batch.status.as_str() {
            "pending" | "preprocessing" | "started" | "finalizing" => BatchStatus::InFlight,
            "finished" => match batch.response_body_url.filter(|u| !u.is_empty()) {
                Some(result_url) => BatchStatus::Success { result_url },
                None => BatchStatus::Failure {
                    reason: format!(
                        "Batch {} finished without results ({} errored operations)",
                        batch.id,
                        batch.errored_operations.unwrap_or(0)
                    ),
                },
            },
            other => BatchStatus::Failure {
                reason: format!("Batch {} ended with status {other}", batch.id),
            },
        };
        Ok(status)
    }

    async fn fetch_results(&self, result_url: &str) -> Result<Vec<OperationResult>, ApiError> {
        // Result archives are pre-signed; no auth header.
        let resp = self.client.get(result_url).send().await?;

        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }

        let bytes = resp.bytes().await?;
        parse_archive(&bytes)
    }
}
