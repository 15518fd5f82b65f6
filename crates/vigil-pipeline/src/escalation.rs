//! Applies the escalation plan for one tenant.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;
use vigil_core::{
  escalation::{self, EscalationCounts, EscalationInput},
  policy::EscalationPolicy,
  store::ViolationStore,
};

use crate::{Error, Result};

/// Plan and write escalation changes for `org_id` as of `business_date`.
///
/// Reading the tenant's state is all-or-nothing; writing is per violation,
/// so one failed write is appended to `errors` and the rest still land. The
/// returned counts cover only the changes that were written. Every write is
/// stamped with `now`.
pub async fn run<S: ViolationStore>(
  store: &S,
  org_id: Uuid,
  business_date: NaiveDate,
  now: DateTime<Utc>,
  policy: &EscalationPolicy,
  errors: &mut Vec<String>,
) -> Result<EscalationCounts> {
  let unresolved = store.list_unresolved(org_id).await.map_err(Error::store)?;
  if unresolved.is_empty() {
    return Ok(EscalationCounts::default());
  }

  let lookback = policy.recurrence_lookback_days.max(policy.systemic_window_days);
  let recent = store
    .list_violations_since(org_id, escalation::window_start(business_date, lookback))
    .await
    .map_err(Error::store)?;
  let events = store
    .list_events(unresolved.iter().map(|v| v.violation_id).collect())
    .await
    .map_err(Error::store)?;

  let plan = escalation::plan(EscalationInput {
    unresolved: &unresolved,
    recent: &recent,
    events: &events,
    business_date,
    now,
    policy,
  });

  let mut applied = EscalationCounts::default();
  for change in plan.changes {
    let id = change.violation_id;
    let counts = change.counts;
    match store.apply_change(change, now).await {
      Ok(()) => applied += counts,
      Err(e) => {
        warn!(%org_id, violation_id = %id, error = %e, "escalation write failed");
        errors.push(format!("escalation: violation {id}: {e}"));
      }
    }
  }

  Ok(applied)
}
