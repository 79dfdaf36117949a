use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::error::{StoreError, StoreResult};
use super::repositories::RunLedger;
use crate::models::{CiProvenance, CursorSource, NewRunRecord, RunOutcome, RunRecord, STAGE_STARTED};

#[derive(Clone)]
pub struct PgRunLedger {
    pool: PgPool,
}

impl PgRunLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_run(row: PgRow) -> StoreResult<RunRecord> {
        let cursor_source: Option<String> = row.try_get("cursor_source")?;
        let cursor_source = cursor_source
            .map(|s| s.parse::<CursorSource>())
            .transpose()
            .map_err(StoreError::Corrupt)?;

        Ok(RunRecord {
            id: row.try_get("id")?,
            job: row.try_get("job")?,
            mode: row.try_get("mode")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            ok: row.try_get("ok")?,
            stage: row.try_get("stage")?,
            total_ids: row.try_get("total_ids")?,
            imported: row.try_get("imported")?,
            failed: row.try_get("failed")?,
            skipped: row.try_get("skipped")?,
            advanced: row.try_get("advanced")?,
            since: row.try_get("since")?,
            until: row.try_get("until")?,
            cursor_source,
            ci: CiProvenance {
                run_id: row.try_get("ci_run_id")?,
                repo: row.try_get("ci_repo")?,
                sha: row.try_get("ci_sha")?,
            },
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[async_trait]
impl RunLedger for PgRunLedger {
    async fn start(&self, run: &NewRunRecord) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_runs (job, mode, started_at, stage, ci_run_id, ci_repo, ci_sha)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&run.job)
        .bind(&run.mode)
        .bind(run.started_at)
        .bind(STAGE_STARTED)
        .bind(&run.ci.run_id)
        .bind(&run.ci.repo)
        .bind(&run.ci.sha)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finish(&self, run_id: i64, outcome: &RunOutcome) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                finished_at = $1, ok = $2, stage = $3, total_ids = $4, imported = $5,
                failed = $6, skipped = $7, advanced = $8, since = $9, until = $10,
                cursor_source = $11, payload = $12, error_message = $13
            WHERE id = $14 AND finished_at IS NULL
            "#,
        )
        .bind(outcome.finished_at)
        .bind(outcome.ok)
        .bind(&outcome.stage)
        .bind(outcome.total_ids)
        .bind(outcome.imported)
        .bind(outcome.failed)
        .bind(outcome.skipped)
        .bind(outcome.advanced)
        .bind(outcome.since)
        .bind(outcome.until)
        .bind(outcome.cursor_source.map(|s| s.as_str()))
        .bind(&outcome.payload)
        .bind(&outcome.error_message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("open run {run_id}")));
        }
        Ok(())
    }

    async fn latest(&self, job: &str) -> StoreResult<Option<RunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, job, mode, started_at, finished_at, ok, stage, total_ids, imported,
                   failed, skipped, advanced, since, until, cursor_source,
                   ci_run_id, ci_repo, ci_sha, payload, error_message
            FROM sync_runs
            WHERE job = $1
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::map_run).transpose()
    }
}
