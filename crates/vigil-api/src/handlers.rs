//! Route handlers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/health` | Unauthenticated liveness |
//! | `POST`, `GET` | `/internal/enforcement/run` | Optional `?date=YYYY-MM-DD`; 200, or 207 when the run had errors |
//! | `PUT`  | `/internal/orgs/{org_id}/policies/{family}` | Body: settings JSON; returns the stored version |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use vigil_core::{policy::PolicyFamily, store::StoredPolicy};
use vigil_pipeline::{Backend, RunReport};

use crate::{AppState, auth::Authenticated, error::ApiError};

// ─── Health ──────────────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "ok" }))
}

// ─── Trigger ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct RunParams {
  /// Business date to enforce. Defaults to yesterday in UTC.
  pub date: Option<NaiveDate>,
}

/// `POST /internal/enforcement/run[?date=YYYY-MM-DD]`
pub async fn run<S: Backend>(
  _auth: Authenticated,
  State(state): State<AppState<S>>,
  Query(params): Query<RunParams>,
) -> (StatusCode, Json<RunReport>) {
  let date = params
    .date
    .unwrap_or_else(|| state.pipeline.default_business_date());
  let report = state.pipeline.run(date).await;
  let status = if report.success {
    StatusCode::OK
  } else {
    StatusCode::MULTI_STATUS
  };
  (status, Json(report))
}

// ─── Policy settings ─────────────────────────────────────────────────────────

/// `PUT /internal/orgs/{org_id}/policies/{family}`
pub async fn put_policy<S: Backend>(
  _auth: Authenticated,
  State(state): State<AppState<S>>,
  Path((org_id, family)): Path<(Uuid, String)>,
  Json(settings): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
  let family: PolicyFamily = family
    .parse()
    .map_err(|_| ApiError::BadRequest(format!("unknown policy family {family:?}")))?;
  let stored: StoredPolicy = state.pipeline.policies().update(org_id, family, settings).await?;
  info!(%org_id, family = family.as_ref(), version = stored.version, "policy updated");
  Ok((StatusCode::CREATED, Json(stored)))
}
