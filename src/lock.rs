use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::db::StoreResult;

/// Proof of one acquisition. Only the matching token releases the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn next() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        static PROCESS: OnceLock<String> = OnceLock::new();
        let process = PROCESS
            .get_or_init(|| format!("{}-{}", std::process::id(), Utc::now().timestamp_millis()));
        Self(format!("{process}-{}", SEQ.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Single-flight guard keyed by name. Acquisition never waits.
#[async_trait]
pub trait ProcessLock: Send + Sync {
    /// `Ok(None)` when another holder has the key and its TTL has not run out.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockToken>>;

    /// No-op when `token` no longer holds `key`, e.g. after a stale takeover.
    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()>;
}

struct Held {
    token: LockToken,
    acquired: Instant,
    ttl: Duration,
}

/// In-process lock. Only guards runs inside one process.
#[derive(Default)]
pub struct MemoryLock {
    held: DashMap<String, Held>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessLock for MemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockToken>> {
        let now = Instant::now();
        let held = Held {
            token: LockToken::next(),
            acquired: now,
            ttl,
        };
        let token = held.token.clone();
        match self.held.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(entry.get().acquired) < entry.get().ttl {
                    return Ok(None);
                }
                tracing::warn!(key, "taking over stale lock");
                entry.insert(held);
            }
            Entry::Vacant(entry) => {
                entry.insert(held);
            }
        }
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        if self.held.remove_if(key, |_, held| held.token == *token).is_none() {
            tracing::warn!(key, "lock no longer held by this run, release skipped");
        }
        Ok(())
    }
}

/// Lock row in `sync_locks`, shared by every process on the same database.
/// The row's `holder` is the token of the acquisition that wrote it.
pub struct PgLock {
    pool: PgPool,
}

impl PgLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessLock for PgLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockToken>> {
        let token = LockToken::next();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);

        // the conflict branch only fires for an expired row, otherwise nothing is returned
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO sync_locks (key, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE sync_locks.expires_at <= excluded.acquired_at
            RETURNING holder
            "#,
        )
        .bind(key)
        .bind(token.as_str())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(token.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!(key, "lock no longer held by this run, release skipped");
        }
        Ok(())
    }
}
