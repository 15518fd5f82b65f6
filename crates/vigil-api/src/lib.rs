//! HTTP surface for Vigil: the authenticated nightly trigger, the policy
//! settings write path and a liveness probe.
//!
//! Exposes an axum [`Router`] over any [`Backend`]. TLS and scheduling are
//! the caller's responsibility.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, put},
};
use tower_http::trace::TraceLayer;
use vigil_pipeline::{Backend, Pipeline};

pub use auth::AuthConfig;
pub use config::ServerConfig;
pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub pipeline: Pipeline<S>,
  pub auth:     Arc<AuthConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { pipeline: self.pipeline.clone(), auth: self.auth.clone() }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<S: Backend>(state: AppState<S>) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route(
      "/internal/enforcement/run",
      get(handlers::run::<S>).post(handlers::run::<S>),
    )
    .route(
      "/internal/orgs/{org_id}/policies/{family}",
      put(handlers::put_policy::<S>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::{Duration, TimeZone, Utc};
  use rand_core::OsRng;
  use tower::ServiceExt as _;
  use uuid::Uuid;
  use vigil_core::{
    cache::ManualClock,
    org::Org,
    policy::{PolicyFamily, PolicyStore},
    store::PolicySettings,
  };
  use vigil_pipeline::{PipelineConfig, RunReport};
  use vigil_store_sqlite::SqliteStore;

  use super::*;

  const SECRET: &str = "night-shift";

  async fn make_state() -> (AppState<SqliteStore>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap(),
    ));
    let policies = Arc::new(PolicyStore::new(
      store.clone(),
      Duration::minutes(5),
      clock.clone(),
    ));
    let salt = SaltString::generate(&mut OsRng);
    let token_hash = Argon2::default()
      .hash_password(SECRET.as_bytes(), &salt)
      .unwrap()
      .to_string();

    let state = AppState {
      pipeline: Pipeline::new(store.clone(), policies, clock, PipelineConfig::default()),
      auth:     Arc::new(AuthConfig { token_hash }),
    };
    (state, store)
  }

  async fn send(
    state: AppState<SqliteStore>,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: &str,
  ) -> axum::response::Response {
    let mut builder = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
      builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    router(state).oneshot(req).await.unwrap()
  }

  async fn json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  // ── Health ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn health_needs_no_auth() {
    let (state, _) = make_state().await;
    let resp = send(state, "GET", "/health", None, "").await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  // ── Trigger ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn trigger_rejects_missing_and_wrong_tokens() {
    let (state, _) = make_state().await;
    let resp = send(state.clone(), "POST", "/internal/enforcement/run", None, "").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

    let resp =
      send(state, "POST", "/internal/enforcement/run", Some("day-shift"), "").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn trigger_defaults_to_yesterday() {
    let (state, store) = make_state().await;
    store
      .insert_org(&Org { org_id: Uuid::new_v4(), name: "Harbor".into(), active: true })
      .await
      .unwrap();

    let resp = send(state, "POST", "/internal/enforcement/run", Some(SECRET), "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: RunReport = json(resp).await;
    assert!(report.success);
    assert_eq!(report.orgs_processed, 1);
    assert_eq!(report.business_date.to_string(), "2024-03-14");
  }

  #[tokio::test]
  async fn trigger_returns_207_when_a_tenant_fails() {
    let (state, store) = make_state().await;
    let org = Org { org_id: Uuid::new_v4(), name: "Harbor".into(), active: true };
    store.insert_org(&org).await.unwrap();
    store
      .save_policy(
        org.org_id,
        PolicyFamily::Comp,
        serde_json::json!({ "approved_reasons": "all of them" }),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
      )
      .await
      .unwrap();

    let resp = send(
      state,
      "GET",
      "/internal/enforcement/run?date=2024-03-10",
      Some(SECRET),
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let report: RunReport = json(resp).await;
    assert!(!report.success);
    assert_eq!(report.business_date.to_string(), "2024-03-10");
    assert_eq!(report.results[0].errors.len(), 1);
  }

  #[tokio::test]
  async fn trigger_rejects_malformed_date() {
    let (state, _) = make_state().await;
    let resp = send(
      state,
      "POST",
      "/internal/enforcement/run?date=yesterday",
      Some(SECRET),
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  // ── Policy settings ───────────────────────────────────────────────────────

  #[tokio::test]
  async fn put_policy_stores_a_new_version_and_refreshes_the_cache() {
    let (state, _) = make_state().await;
    let org_id = Uuid::new_v4();
    let policies = state.pipeline.policies().clone();
    assert!(policies.load(org_id).await.unwrap().comp.is_none());

    let uri = format!("/internal/orgs/{org_id}/policies/comp");
    let body = r#"{"high_value_comp_threshold": 150.0}"#;
    let resp = send(state.clone(), "PUT", &uri, Some(SECRET), body).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let stored: serde_json::Value = json(resp).await;
    assert_eq!(stored["version"], 1);

    let loaded = policies.load(org_id).await.unwrap();
    assert_eq!(loaded.comp.as_ref().unwrap().policy.high_value_comp_threshold, 150.0);
  }

  #[tokio::test]
  async fn put_policy_rejects_bad_family_and_bad_shape() {
    let (state, _) = make_state().await;
    let org_id = Uuid::new_v4();

    let uri = format!("/internal/orgs/{org_id}/policies/marketing");
    let resp = send(state.clone(), "PUT", &uri, Some(SECRET), "{}").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/internal/orgs/{org_id}/policies/labor");
    let resp =
      send(state.clone(), "PUT", &uri, Some(SECRET), r#"{"splh_floor":"high"}"#).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = send(state, "PUT", &uri, None, "{}").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }
}
