use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Singleton cursor row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_cursor: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Where the lower bound of a run window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSource {
    Override,
    Persisted,
    FallbackWindow,
}

impl CursorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Persisted => "persisted",
            Self::FallbackWindow => "fallback_window",
        }
    }
}

impl fmt::Display for CursorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CursorSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override" => Ok(Self::Override),
            "persisted" => Ok(Self::Persisted),
            "fallback_window" => Ok(Self::FallbackWindow),
            other => Err(format!("unknown cursor source {other:?}")),
        }
    }
}

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    IncrementalHttp,
    IncrementalCli,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncrementalHttp => "incremental_stateful",
            Self::IncrementalCli => "incremental_stateful_no_http",
        }
    }
}

/// Build provenance attached to a run when executed from CI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiProvenance {
    pub run_id: Option<String>,
    pub repo: Option<String>,
    pub sha: Option<String>,
}

impl CiProvenance {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            run_id: var("GITHUB_RUN_ID"),
            repo: var("GITHUB_REPOSITORY"),
            sha: var("GITHUB_SHA"),
        }
    }
}

/// Ledger row as inserted when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRunRecord {
    pub job: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub ci: CiProvenance,
}

/// Terminal values written once when a run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub stage: String,
    pub total_ids: i32,
    pub imported: i32,
    pub failed: i32,
    pub skipped: i32,
    pub advanced: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor_source: Option<CursorSource>,
    pub payload: Value,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub job: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ok: Option<bool>,
    pub stage: String,
    pub total_ids: i32,
    pub imported: i32,
    pub failed: i32,
    pub skipped: i32,
    pub advanced: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor_source: Option<CursorSource>,
    pub ci: CiProvenance,
    pub payload: Option<Value>,
    pub error_message: Option<String>,
}

pub const STAGE_STARTED: &str = "started";
pub const STAGE_COMPLETED: &str = "completed";
pub const STAGE_EXCEPTION: &str = "exception";

impl RunRecord {
    pub fn from_new(id: i64, new: &NewRunRecord) -> Self {
        Self {
            id,
            job: new.job.clone(),
            mode: new.mode.clone(),
            started_at: new.started_at,
            finished_at: None,
            ok: None,
            stage: STAGE_STARTED.to_string(),
            total_ids: 0,
            imported: 0,
            failed: 0,
            skipped: 0,
            advanced: false,
            since: None,
            until: None,
            cursor_source: None,
            ci: new.ci.clone(),
            payload: None,
            error_message: None,
        }
    }

    pub fn apply(&mut self, outcome: &RunOutcome) {
        self.finished_at = Some(outcome.finished_at);
        self.ok = Some(outcome.ok);
        self.stage = outcome.stage.clone();
        self.total_ids = outcome.total_ids;
        self.imported = outcome.imported;
        self.failed = outcome.failed;
        self.skipped = outcome.skipped;
        self.advanced = outcome.advanced;
        self.since = outcome.since;
        self.until = outcome.until;
        self.cursor_source = outcome.cursor_source;
        self.payload = Some(outcome.payload.clone());
        self.error_message = outcome.error_message.clone();
    }

    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}
