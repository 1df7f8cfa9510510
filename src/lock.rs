use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db;
use crate::error::QueueError;

/// A named, expiring mutual-exclusion lease.
///
/// `try_acquire` succeeds only when no unexpired lease exists for `name`.
/// A crashed holder blocks others for at most one lease period.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    async fn try_acquire(&self, name: &str, holder: Uuid, lease: Duration)
    -> Result<bool, QueueError>;

    /// Push the expiry out by `lease`. Returns false when `holder` no longer
    /// owns an unexpired lease.
    async fn renew(&self, name: &str, holder: Uuid, lease: Duration) -> Result<bool, QueueError>;

    /// Only the current holder can release.
    async fn release(&self, name: &str, holder: Uuid) -> Result<(), QueueError>;
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct PgLeaseLock {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgLeaseLock {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl LeaseLock for PgLeaseLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let now = self.clock.now();
        Ok(db::locks::try_acquire(&self.pool, name, holder, now, lease_end(now, lease)).await?)
    }

    async fn renew(&self, name: &str, holder: Uuid, lease: Duration) -> Result<bool, QueueError> {
        let now = self.clock.now();
        Ok(db::locks::renew(&self.pool, name, holder, now, lease_end(now, lease)).await?)
    }

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), QueueError> {
        Ok(db::locks::release(&self.pool, name, holder).await?)
    }
}

/// Process-local leases for single-instance deployments and tests.
pub struct MemoryLeaseLock {
    /// name -> (holder, expires_at)
    leases: DashMap<String, (Uuid, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryLeaseLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            clock,
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        let now = self.clock.now();
        self.leases
            .get(name)
            .is_some_and(|lease| lease.value().1 > now)
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let now = self.clock.now();
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > now {
                    return Ok(false);
                }
                entry.insert((holder, lease_end(now, lease)));
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert((holder, lease_end(now, lease)));
                Ok(true)
            }
        }
    }

    async fn renew(&self, name: &str, holder: Uuid, lease: Duration) -> Result<bool, QueueError> {
        let now = self.clock.now();
        match self.leases.get_mut(name) {
            Some(mut entry) if entry.0 == holder && entry.1 > now => {
                entry.1 = lease_end(now, lease);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), QueueError> {
        self.leases.remove_if(name, |_, (owner, _)| *owner == holder);
        Ok(())
    }
}
