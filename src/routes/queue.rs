use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Operation, OperationType, QueueItem, QueueStats};
use crate::processor::{DispatchOutcome, EnqueueRequest, PriorityInputs};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct EnqueueBody {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub audience_id: String,
    pub operation: OperationType,
    pub email: String,
    #[serde(default)]
    pub merge_fields: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub double_opt_in: bool,
    #[serde(default)]
    pub vip: bool,
}

#[derive(Deserialize)]
pub struct StatsParams {
    pub hours: Option<u64>,
}

pub async fn enqueue(
    State(state): State<SharedState>,
    Json(req): Json<EnqueueBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let operation = match req.operation {
        OperationType::Subscribe => Operation::Subscribe {
            merge_fields: req.merge_fields,
            tags: req.tags,
            double_opt_in: req.double_opt_in,
        },
        OperationType::Unsubscribe => Operation::Unsubscribe,
        OperationType::Update => Operation::Update {
            merge_fields: req.merge_fields,
        },
    };

    let id = state
        .processor
        .enqueue(EnqueueRequest {
            source_id: req.source_id,
            audience_id: req.audience_id,
            target_key: req.email,
            operation,
            priority: PriorityInputs {
                double_opt_in: req.double_opt_in,
                vip: req.vip,
            },
        })
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn stats(
    State(state): State<SharedState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<QueueStats>, AppError> {
    let hours = params.hours.unwrap_or(24);
    let window = match hours {
        0 => None,
        h => Some(
            h.checked_mul(60 * 60)
                .map(Duration::from_secs)
                .ok_or_else(|| AppError::BadRequest(format!("hours out of range: {h}")))?,
        ),
    };
    let stats = state.processor.get_statistics(window).await?;
    Ok(Json(stats))
}

pub async fn get_item(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItem>, AppError> {
    let item = state
        .processor
        .store()
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue item not found".to_string()))?;
    Ok(Json(item))
}

pub async fn process_now(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let body = match state.processor.run_dispatch_tick().await? {
        DispatchOutcome::Skipped => json!({ "skipped": true }),
        DispatchOutcome::Ran(summary) => json!({
            "skipped": false,
            "dispatched": summary.claimed,
            "batches_submitted": summary.batches_submitted,
            "batches_rejected": summary.batches_rejected,
            "reclaimed": summary.reclaimed,
            "lease_lost": summary.lease_lost,
        }),
    };
    Ok(Json(body))
}

pub async fn purge(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let retention = state.processor.settings().retention;
    let purged = state.processor.purge(retention).await?;
    Ok(Json(json!({ "purged": purged })))
}
