use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::reconciler::InvoiceReconciler;
use crate::config::SyncConfig;
use crate::db::{InvoiceStore, RunLedger, StoreError, SyncStateStore};
use crate::holded::models::timestamp_from_value;
use crate::holded::{ChangedDocumentDiscovery, HoldedClient, DOC_TYPE_INVOICE};
use crate::lock::ProcessLock;
use crate::models::{
    CiProvenance, CursorSource, FailedDocument, NewRunRecord, RunMode, RunOutcome, RunReport,
    SkippedDocument, STAGE_COMPLETED, STAGE_EXCEPTION,
};

pub const STAGE_READ_SYNC_STATE: &str = "read_sync_state";
pub const STAGE_RESOLVE_WINDOW: &str = "resolve_window";
pub const STAGE_DISCOVERY: &str = "discovery";
pub const STAGE_WRITE_SYNC_STATE: &str = "write_sync_state";

/// Run-level knobs, taken from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub job_name: String,
    pub lock_key: String,
    pub lock_ttl: Duration,
    pub default_limit: u32,
    pub max_limit: u32,
    pub fallback_window_days: i64,
    pub accepted_currencies: Vec<String>,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            job_name: config.job_name.clone(),
            lock_key: config.lock_key.clone(),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            fallback_window_days: config.fallback_window_days,
            accepted_currencies: config.accepted_currencies.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub mode: RunMode,
    pub limit: Option<u32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
}

impl RunArgs {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            limit: None,
            since: None,
            until: None,
            request_id: None,
        }
    }
}

/// Errors that prevent a run from producing a report at all.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Busy")]
    Busy,

    #[error("lock error: {0}")]
    Lock(StoreError),

    #[error("run ledger error: {0}")]
    Ledger(StoreError),
}

/// A stage that aborted the run.
struct StageFailure {
    stage: &'static str,
    message: String,
}

impl StageFailure {
    fn new(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Zero or absent falls back to the default, anything else is capped.
pub fn clamp_limit(requested: Option<u32>, default: u32, max: u32) -> u32 {
    match requested {
        Some(n) if n > 0 => n.min(max),
        _ => default.clamp(1, max.max(1)),
    }
}

/// Window bound given on the command line or the trigger query: RFC 3339,
/// `YYYY-MM-DD` (midnight UTC) or unix seconds/milliseconds.
pub fn parse_window_bound(raw: &str) -> Result<DateTime<Utc>, String> {
    timestamp_from_value(&Value::String(raw.to_string()))
        .ok_or_else(|| format!("invalid date {raw:?}, expected RFC 3339 or YYYY-MM-DD"))
}

/// Runs one incremental pass: lock, window, discovery, reconcile, cursor, ledger.
pub struct SyncOrchestrator {
    client: HoldedClient,
    invoices: Arc<dyn InvoiceStore>,
    state: Arc<dyn SyncStateStore>,
    ledger: Arc<dyn RunLedger>,
    lock: Arc<dyn ProcessLock>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        client: HoldedClient,
        invoices: Arc<dyn InvoiceStore>,
        state: Arc<dyn SyncStateStore>,
        ledger: Arc<dyn RunLedger>,
        lock: Arc<dyn ProcessLock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            client,
            invoices,
            state,
            ledger,
            lock,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Execute a run if no other run holds the lock.
    ///
    /// Per-document and stage failures are reported through the returned
    /// report (`ok = false` for the latter); `Err` means no run took place or
    /// its ledger row could not be opened.
    pub async fn run(&self, args: RunArgs) -> Result<RunReport, SyncError> {
        let key = self.settings.lock_key.as_str();
        let Some(token) = self
            .lock
            .try_acquire(key, self.settings.lock_ttl)
            .await
            .map_err(SyncError::Lock)?
        else {
            tracing::warn!(lock_key = key, "sync already running");
            return Err(SyncError::Busy);
        };

        let result = self.run_locked(args).await;

        if let Err(e) = self.lock.release(key, &token).await {
            tracing::error!(lock_key = key, error = %e, "failed to release sync lock");
        }
        result
    }

    async fn run_locked(&self, args: RunArgs) -> Result<RunReport, SyncError> {
        let started = Utc::now();
        let limit = clamp_limit(args.limit, self.settings.default_limit, self.settings.max_limit);

        let run_id = self
            .ledger
            .start(&NewRunRecord {
                job: self.settings.job_name.clone(),
                mode: args.mode.as_str().to_string(),
                started_at: started,
                ci: CiProvenance::from_env(),
            })
            .await
            .map_err(SyncError::Ledger)?;

        tracing::info!(run_id, mode = args.mode.as_str(), limit, "sync run started");

        let mut report = RunReport::new(args.mode, Some(run_id), limit, started);
        let outcome = self.execute(run_id, &args, limit, &mut report).await;
        report.at.finished = Utc::now();

        match outcome {
            Ok(()) => report.ok = true,
            Err(failure) => {
                tracing::error!(run_id, stage = failure.stage, error = %failure.message, "sync run aborted");
                report.ok = false;
                report.stage = Some(failure.stage.to_string());
                report.error = Some(failure.message);
            }
        }

        let run_outcome = RunOutcome {
            finished_at: report.at.finished,
            ok: report.ok,
            stage: if report.ok { STAGE_COMPLETED } else { STAGE_EXCEPTION }.to_string(),
            total_ids: count(report.total_ids),
            imported: count(report.imported),
            failed: count(report.failed),
            skipped: count(report.skipped),
            advanced: report.cursor.advanced,
            since: report.cursor.since,
            until: report.cursor.until,
            cursor_source: report.cursor.source,
            payload: serde_json::to_value(&report).unwrap_or_default(),
            error_message: report.error.clone(),
        };
        if let Err(e) = self.ledger.finish(run_id, &run_outcome).await {
            tracing::error!(run_id, error = %e, "failed to close run record");
        }

        tracing::info!(
            run_id,
            ok = report.ok,
            total_ids = report.total_ids,
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            advanced = report.cursor.advanced,
            "sync run finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        run_id: i64,
        args: &RunArgs,
        limit: u32,
        report: &mut RunReport,
    ) -> Result<(), StageFailure> {
        let state = self
            .state
            .read()
            .await
            .map_err(|e| StageFailure::new(STAGE_READ_SYNC_STATE, e))?;
        let prev_cursor = state.and_then(|s| s.last_cursor);

        // the cursor never moves back, so it must never pass the run start
        let started = report.at.started;
        let until = match args.until {
            Some(until) if until > started => {
                tracing::warn!(run_id, requested = %until, %started, "until is in the future, clamped to run start");
                started
            }
            Some(until) => until,
            None => started,
        };
        let (since, source) = match (args.since, prev_cursor) {
            (Some(since), _) => (since, CursorSource::Override),
            (None, Some(cursor)) => (cursor, CursorSource::Persisted),
            (None, None) => {
                let days = self.settings.fallback_window_days;
                let since = chrono::Duration::try_days(days)
                    .and_then(|window| until.checked_sub_signed(window))
                    .ok_or_else(|| {
                        StageFailure::new(
                            STAGE_RESOLVE_WINDOW,
                            format!("fallback window of {days} days is out of range"),
                        )
                    })?;
                (since, CursorSource::FallbackWindow)
            }
        };
        report.cursor.source = Some(source);
        report.cursor.prev_db_cursor = prev_cursor;
        report.cursor.since = Some(since);
        report.cursor.until = Some(until);

        let request_id = args
            .request_id
            .clone()
            .unwrap_or_else(|| format!("holded-sync-{run_id}"));
        let client = self.client.with_request_id(request_id);

        let discovered = ChangedDocumentDiscovery::new(client.clone())
            .list_changed(DOC_TYPE_INVOICE, since, until)
            .await
            .map_err(|e| StageFailure::new(STAGE_DISCOVERY, e))?;
        report.discovery_capped = discovered.page_capped;
        let mut ids = discovered.ids;

        let limit = limit as usize;
        if ids.len() > limit {
            report.truncated = ids.len() - limit;
            tracing::warn!(
                run_id,
                discovered = ids.len(),
                limit,
                "discovered more ids than the run limit"
            );
            ids.truncate(limit);
        }
        report.total_ids = ids.len();

        let reconciler = InvoiceReconciler::new(
            client,
            self.invoices.clone(),
            self.settings.accepted_currencies.clone(),
        );
        for id in &ids {
            match reconciler.reconcile_one(id).await {
                Ok(_) => report.imported += 1,
                Err(e) if e.is_skip() => {
                    tracing::info!(run_id, holded_id = %id, reason = %e, "document skipped");
                    report.skipped_ids.push(SkippedDocument {
                        holded_id: id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(run_id, holded_id = %id, step = %e.step(), error = %e, "document failed");
                    report.failures.push(FailedDocument {
                        holded_id: id.clone(),
                        step: e.step().as_str().to_string(),
                        error: e.to_string(),
                        code: e.code().map(str::to_string),
                        status: e.status(),
                    });
                }
            }
        }
        report.skipped = report.skipped_ids.len();
        report.failed = report.failures.len();

        if report.failed > 0 {
            tracing::info!(run_id, failed = report.failed, "cursor held back");
            return Ok(());
        }

        self.state
            .advance(until, Utc::now())
            .await
            .map_err(|e| StageFailure::new(STAGE_WRITE_SYNC_STATE, e))?;
        report.cursor.advanced = true;
        Ok(())
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
