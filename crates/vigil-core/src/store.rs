//! Storage traits.
//!
//! Implemented by storage backends (e.g. `vigil-store-sqlite`). The pipeline
//! depends on these abstractions, not on any concrete backend.
//!
//! - [`FactSource`]: read-only access to the directory and the fact tables
//!   the POS sync populates.
//! - [`PolicySettings`]: versioned org policy blobs.
//! - [`ViolationStore`]: violations, the append-only event ledger, actions and
//!   score records. Nothing here ever deletes.
//!
//! All methods return `Send` futures so implementations can be driven from
//! spawned tokio tasks.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  escalation::ViolationChange,
  facts::{
    CompCheck, CostEntry, InventoryBalance, InventoryCount, InvoiceVariance,
    LaborDay, ParLevel, RecipeCostSnapshot,
  },
  org::{Org, Venue},
  policy::PolicyFamily,
  scoring::ScoreRecord,
  violation::{
    Action, ActionTemplate, NewViolation, Severity, Violation, ViolationEvent,
    ViolationType,
  },
};

// ─── Facts ───────────────────────────────────────────────────────────────────

pub trait FactSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Directory ─────────────────────────────────────────────────────────

  fn list_active_orgs(
    &self,
  ) -> impl Future<Output = Result<Vec<Org>, Self::Error>> + Send + '_;

  fn list_venues(
    &self,
    org_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Venue>, Self::Error>> + Send + '_;

  // ── Comps & labor ─────────────────────────────────────────────────────

  fn comp_checks(
    &self,
    venue_id: Uuid,
    business_date: NaiveDate,
  ) -> impl Future<Output = Result<Vec<CompCheck>, Self::Error>> + Send + '_;

  /// The venue's daily labor row, if the sync produced one.
  fn labor_day(
    &self,
    venue_id: Uuid,
    business_date: NaiveDate,
  ) -> impl Future<Output = Result<Option<LaborDay>, Self::Error>> + Send + '_;

  // ── Procurement & inventory ───────────────────────────────────────────

  /// Cost observations with `from <= business_date <= to`.
  fn cost_entries(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> impl Future<Output = Result<Vec<CostEntry>, Self::Error>> + Send + '_;

  fn unresolved_invoice_variances(
    &self,
    venue_id: Uuid,
  ) -> impl Future<Output = Result<Vec<InvoiceVariance>, Self::Error>> + Send + '_;

  /// Counts (with lines) taken with `from <= counted_on <= to`.
  fn inventory_counts(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> impl Future<Output = Result<Vec<InventoryCount>, Self::Error>> + Send + '_;

  fn inventory_balances(
    &self,
    venue_id: Uuid,
  ) -> impl Future<Output = Result<Vec<InventoryBalance>, Self::Error>> + Send + '_;

  /// Recipe cost snapshots taken on or before `until`.
  fn recipe_cost_snapshots(
    &self,
    venue_id: Uuid,
    until: NaiveDate,
  ) -> impl Future<Output = Result<Vec<RecipeCostSnapshot>, Self::Error>> + Send + '_;

  /// Rows of the reorder view currently below their reorder point.
  fn items_below_reorder_point(
    &self,
    venue_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ParLevel>, Self::Error>> + Send + '_;
}

// ─── Policy settings ─────────────────────────────────────────────────────────

/// One stored version of one policy family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPolicy {
  pub org_id:         Uuid,
  pub family:         PolicyFamily,
  pub version:        i64,
  pub settings:       serde_json::Value,
  pub effective_from: DateTime<Utc>,
}

pub trait PolicySettings: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The highest version whose `effective_from <= as_of`.
  fn active_policy(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<StoredPolicy>, Self::Error>> + Send + '_;

  /// Append a new version. Earlier versions are kept.
  fn save_policy(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    settings: serde_json::Value,
    effective_from: DateTime<Utc>,
  ) -> impl Future<Output = Result<StoredPolicy, Self::Error>> + Send + '_;
}

// ─── Violations ──────────────────────────────────────────────────────────────

/// Input to [`ViolationStore::insert_action`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
  pub org_id:       Uuid,
  pub violation_id: Uuid,
  pub template_id:  Uuid,
  pub action_type:  String,
  pub message:      String,
  pub target:       String,
}

pub trait ViolationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Look up a violation id by its idempotency key.
  fn find_violation(
    &self,
    org_id: Uuid,
    source_id: String,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  /// Insert with `status = open`, zeroed escalation state and
  /// `verification_required = severity == critical`.
  ///
  /// The `created` event (detail: `source_id`, `severity`,
  /// `policy_fingerprint`) is written in the same transaction, so a stored
  /// violation always has its creation event. Both are stamped with `at`.
  ///
  /// Returns `None` when `(org_id, source_id)` already exists; the uniqueness
  /// constraint, not the caller's prior lookup, is what guarantees this.
  fn insert_violation(
    &self,
    input: NewViolation,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Violation>, Self::Error>> + Send + '_;

  /// Write the escalation fields of one violation and append its events,
  /// atomically. `at` becomes `updated_at` and the events' `recorded_at`.
  fn apply_change(
    &self,
    change: ViolationChange,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn matching_templates(
    &self,
    org_id: Uuid,
    violation_type: ViolationType,
    severity: Severity,
  ) -> impl Future<Output = Result<Vec<ActionTemplate>, Self::Error>> + Send + '_;

  /// Record a pending action.
  fn insert_action(
    &self,
    input: NewAction,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Action, Self::Error>> + Send + '_;

  /// Insert or replace the score for `(org, entity, entity_id, as_of)`.
  fn upsert_score(
    &self,
    record: ScoreRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_violation(
    &self,
    violation_id: Uuid,
  ) -> impl Future<Output = Result<Option<Violation>, Self::Error>> + Send + '_;

  /// Every violation of the org whose status is open, acknowledged or
  /// escalated.
  fn list_unresolved(
    &self,
    org_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Violation>, Self::Error>> + Send + '_;

  /// Every violation of the org, any status, with `business_date >= since`.
  fn list_violations_since(
    &self,
    org_id: Uuid,
    since: NaiveDate,
  ) -> impl Future<Output = Result<Vec<Violation>, Self::Error>> + Send + '_;

  /// A venue's violations with `from <= business_date <= to`.
  fn list_venue_violations(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> impl Future<Output = Result<Vec<Violation>, Self::Error>> + Send + '_;

  /// Ledger rows for the given violations, oldest first.
  fn list_events(
    &self,
    violation_ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<Vec<ViolationEvent>, Self::Error>> + Send + '_;

  fn list_actions(
    &self,
    violation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Action>, Self::Error>> + Send + '_;

  fn list_scores(
    &self,
    org_id: Uuid,
    as_of: NaiveDate,
  ) -> impl Future<Output = Result<Vec<ScoreRecord>, Self::Error>> + Send + '_;
}
