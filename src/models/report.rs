use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync::{CursorSource, RunMode};

/// JSON body returned to the trigger caller and stored as the run payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub ok: bool,
    pub mode: String,
    pub run_id: Option<i64>,
    pub limit: u32,
    pub total_ids: usize,
    /// Ids discovered but left for a later run because of `limit`.
    pub truncated: usize,
    /// Discovery stopped at its page cap; more changed ids may exist upstream.
    pub discovery_capped: bool,
    pub imported: usize,
    pub skipped: usize,
    pub skipped_ids: Vec<SkippedDocument>,
    pub failed: usize,
    pub failures: Vec<FailedDocument>,
    pub cursor: CursorReport,
    pub at: RunTimes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Empty report for a run that has just been opened.
    pub fn new(mode: RunMode, run_id: Option<i64>, limit: u32, started: DateTime<Utc>) -> Self {
        Self {
            ok: false,
            mode: mode.as_str().to_string(),
            run_id,
            limit,
            total_ids: 0,
            truncated: 0,
            discovery_capped: false,
            imported: 0,
            skipped: 0,
            skipped_ids: Vec::new(),
            failed: 0,
            failures: Vec::new(),
            cursor: CursorReport {
                source: None,
                prev_db_cursor: None,
                since: None,
                until: None,
                advanced: false,
            },
            at: RunTimes {
                started,
                finished: started,
            },
            stage: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub holded_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub holded_id: String,
    pub step: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorReport {
    pub source: Option<CursorSource>,
    pub prev_db_cursor: Option<DateTime<Utc>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTimes {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}
