use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ItemUpdate, NewQueueItem, QueueItem, QueueStatus};

pub async fn insert(
    pool: &PgPool,
    item: &NewQueueItem,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO queue_items
            (id, batch_id, source_id, audience_id, operation_type, target_key, payload, priority, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(item.batch_id)
    .bind(&item.source_id)
    .bind(&item.audience_id)
    .bind(item.operation.kind())
    .bind(&item.target_key)
    .bind(payload)
    .bind(item.priority)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Highest priority first, oldest first within a priority.
pub async fn select_pending_or_retrying(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM queue_items
         WHERE status IN ('pending', 'retrying')
         ORDER BY priority DESC, created_at ASC, id ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM queue_items WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM queue_items WHERE id = ANY($1) ORDER BY priority DESC, created_at ASC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

/// Bulk transition. Terminal rows are left untouched.
pub async fn update_status(
    pool: &PgPool,
    ids: &[Uuid],
    status: QueueStatus,
    processed_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queue_items SET status = $2, processed_at = $3
         WHERE id = ANY($1) AND status NOT IN ('completed', 'failed')",
    )
    .bind(ids)
    .bind(status)
    .bind(processed_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_item(
    pool: &PgPool,
    id: Uuid,
    update: &ItemUpdate,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queue_items SET
            status = COALESCE($2, status),
            retry_count = COALESCE($3, retry_count),
            error_message = COALESCE($4, error_message),
            external_batch_ref = COALESCE($5, external_batch_ref),
            processed_at = COALESCE($6, processed_at)
         WHERE id = $1 AND status NOT IN ('completed', 'failed')",
    )
    .bind(id)
    .bind(update.status)
    .bind(update.retry_count)
    .bind(update.error_message.as_deref())
    .bind(update.external_batch_ref.as_deref())
    .bind(update.processed_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn purge_older_than(
    pool: &PgPool,
    statuses: &[QueueStatus],
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let result = sqlx::query(
        "DELETE FROM queue_items WHERE status::text = ANY($1) AND created_at < $2",
    )
    .bind(&statuses)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(
    pool: &PgPool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<(QueueStatus, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (QueueStatus, i64)>(
        "SELECT status, COUNT(*) FROM queue_items
         WHERE ($1::timestamptz IS NULL OR created_at >= $1)
         GROUP BY status",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

pub async fn find_stale_processing(
    pool: &PgPool,
    claimed_before: DateTime<Utc>,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM queue_items
         WHERE status = 'processing' AND processed_at < $1
         ORDER BY processed_at ASC",
    )
    .bind(claimed_before)
    .fetch_all(pool)
    .await
}
