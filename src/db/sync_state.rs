use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::error::StoreResult;
use super::repositories::SyncStateStore;
use crate::models::SyncState;

/// Cursor store on the singleton `holded_sync_state` row.
#[derive(Clone)]
pub struct PgSyncStateStore {
    pool: PgPool,
}

impl PgSyncStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateStore for PgSyncStateStore {
    async fn read(&self) -> StoreResult<Option<SyncState>> {
        let row = sqlx::query(
            "SELECT last_cursor, last_sync_at, updated_at FROM holded_sync_state WHERE id = true",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(SyncState {
                last_cursor: row.try_get("last_cursor")?,
                last_sync_at: row.try_get("last_sync_at")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn advance(&self, cursor: DateTime<Utc>, synced_at: DateTime<Utc>) -> StoreResult<SyncState> {
        // greatest() ignores nulls, so a fresh row takes the new cursor as is
        let row = sqlx::query(
            r#"
            INSERT INTO holded_sync_state (id, last_cursor, last_sync_at, updated_at)
            VALUES (true, $1, $2, now())
            ON CONFLICT (id) DO UPDATE SET
                last_cursor = greatest(holded_sync_state.last_cursor, excluded.last_cursor),
                last_sync_at = excluded.last_sync_at,
                updated_at = now()
            RETURNING last_cursor, last_sync_at, updated_at
            "#,
        )
        .bind(cursor)
        .bind(synced_at)
        .fetch_one(&self.pool)
        .await?;

        let state = SyncState {
            last_cursor: row.try_get("last_cursor")?,
            last_sync_at: row.try_get("last_sync_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        tracing::info!(cursor = ?state.last_cursor, "sync cursor advanced");
        Ok(state)
    }
}
