use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::auth::InternalBearer;
use super::error::ApiError;
use super::AppState;
use crate::models::{RunMode, RunRecord};
use crate::service::orchestrator::parse_window_bound;
use crate::service::RunArgs;

/// Trigger query: `?limit=&since=&until=`.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    pub limit: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl TriggerQuery {
    /// A non-numeric limit falls back to the default; a malformed date is rejected.
    pub fn into_args(self) -> Result<RunArgs, ApiError> {
        let bound = |raw: Option<String>| {
            raw.filter(|s| !s.trim().is_empty())
                .map(|s| parse_window_bound(s.trim()))
                .transpose()
                .map_err(ApiError::BadRequest)
        };
        Ok(RunArgs {
            limit: self.limit.and_then(|l| l.trim().parse::<u32>().ok()),
            since: bound(self.since)?,
            until: bound(self.until)?,
            ..RunArgs::new(RunMode::IncrementalHttp)
        })
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// Run one incremental import. 200 with the report when the run completed,
/// 500 with the report when a stage aborted it, 409 when a run is in flight.
pub async fn import_incremental(
    State(state): State<AppState>,
    _auth: InternalBearer,
    query: Result<Query<TriggerQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let args = query.into_args()?;
    let report = state.orchestrator.run(args).await?;

    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)).into_response())
}

/// Most recent run of the sync job, finished or not.
pub async fn last_run(
    State(state): State<AppState>,
    _auth: InternalBearer,
) -> Result<Json<RunRecord>, ApiError> {
    let job = &state.orchestrator.settings().job_name;
    state
        .orchestrator
        .ledger()
        .latest(job)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no runs recorded for {job}")))
}
