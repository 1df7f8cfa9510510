use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Take the named lease if it is free or expired. Returns true when `holder` now owns it.
pub async fn try_acquire(
    pool: &PgPool,
    name: &str,
    holder: Uuid,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let acquired = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO processing_locks (name, holder, expires_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE
             SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
             WHERE processing_locks.expires_at <= $4
         RETURNING holder",
    )
    .bind(name)
    .bind(holder)
    .bind(expires_at)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(acquired == Some(holder))
}

/// Extend a lease still held by `holder`. Returns false once it has expired or changed hands.
pub async fn renew(
    pool: &PgPool,
    name: &str,
    holder: Uuid,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE processing_locks SET expires_at = $3
         WHERE name = $1 AND holder = $2 AND expires_at > $4",
    )
    .bind(name)
    .bind(holder)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release(pool: &PgPool, name: &str, holder: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM processing_locks WHERE name = $1 AND holder = $2")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}
