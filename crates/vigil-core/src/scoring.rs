//! Composite risk scores for managers and venues.
//!
//! A score is derived state: a pure function of the unresolved violation set
//! and the `as_of` date. Nothing here reads a clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  exception::round2,
  org::Venue,
  violation::{Severity, Violation},
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScoredEntity {
  Manager,
  Venue,
}

/// Points each open violation contributes to its manager's and venue's
/// risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
  pub warning:          f64,
  pub critical:         f64,
  pub per_level:        f64,
  pub per_age_day:      f64,
  pub max_age_days:     i64,
  pub per_recurrence:   f64,
  pub cross_venue:      f64,
  pub per_penalty:      f64,
  pub max_score:        f64,
}

impl Default for ScoreWeights {
  fn default() -> Self {
    Self {
      warning:        5.0,
      critical:       15.0,
      per_level:      5.0,
      per_age_day:    0.5,
      max_age_days:   30,
      per_recurrence: 3.0,
      cross_venue:    10.0,
      per_penalty:    5.0,
      max_score:      100.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
  pub org_id:               Uuid,
  pub entity:               ScoredEntity,
  pub entity_id:            Uuid,
  pub as_of:                NaiveDate,
  /// 0–100; higher is riskier.
  pub risk_score:           f64,
  pub open_warning:         u32,
  pub open_critical:        u32,
  pub max_escalation_level: u32,
  pub cross_venue_open:     u32,
  pub oldest_open_days:     i64,
}

impl ScoreRecord {
  fn empty(org_id: Uuid, entity: ScoredEntity, entity_id: Uuid, as_of: NaiveDate) -> Self {
    Self {
      org_id,
      entity,
      entity_id,
      as_of,
      risk_score: 0.0,
      open_warning: 0,
      open_critical: 0,
      max_escalation_level: 0,
      cross_venue_open: 0,
      oldest_open_days: 0,
    }
  }

  fn add(&mut self, v: &Violation, points: f64, age_days: i64) {
    self.risk_score += points;
    match v.severity {
      Severity::Warning => self.open_warning += 1,
      Severity::Critical => self.open_critical += 1,
    }
    self.max_escalation_level = self.max_escalation_level.max(v.escalation_level);
    if v.cross_venue {
      self.cross_venue_open += 1;
    }
    self.oldest_open_days = self.oldest_open_days.max(age_days);
  }
}

/// Points one violation contributes as of `as_of`.
pub fn violation_points(v: &Violation, as_of: NaiveDate, w: &ScoreWeights) -> f64 {
  let age = (as_of - v.business_date).num_days().clamp(0, w.max_age_days);
  let base = match v.severity {
    Severity::Warning => w.warning,
    Severity::Critical => w.critical,
  };
  let penalties = u32::from(v.silence_penalized) + u32::from(v.stall_penalized);
  base
    + w.per_level * f64::from(v.escalation_level)
    + w.per_age_day * age as f64
    + w.per_recurrence * f64::from(v.recurrence_count)
    + if v.cross_venue { w.cross_venue } else { 0.0 }
    + w.per_penalty * f64::from(penalties)
}

/// Score every venue of the tenant and every manager that is attributed a
/// venue or an unresolved violation. Output is sorted by
/// `(entity, entity_id)`.
pub fn score_tenant(
  org_id: Uuid,
  violations: &[Violation],
  venues: &[Venue],
  as_of: NaiveDate,
  weights: &ScoreWeights,
) -> Vec<ScoreRecord> {
  let venue_manager: BTreeMap<Uuid, Option<Uuid>> =
    venues.iter().map(|v| (v.venue_id, v.manager_id)).collect();

  let mut records: BTreeMap<(ScoredEntity, Uuid), ScoreRecord> = BTreeMap::new();
  let entry = |records: &mut BTreeMap<(ScoredEntity, Uuid), ScoreRecord>,
               entity: ScoredEntity,
               id: Uuid| {
    records
      .entry((entity, id))
      .or_insert_with(|| ScoreRecord::empty(org_id, entity, id, as_of));
  };

  let managers: BTreeSet<Uuid> = venues.iter().filter_map(|v| v.manager_id).collect();
  for v in venues {
    entry(&mut records, ScoredEntity::Venue, v.venue_id);
  }
  for m in managers {
    entry(&mut records, ScoredEntity::Manager, m);
  }

  for v in violations.iter().filter(|v| v.status.is_unresolved()) {
    let points = violation_points(v, as_of, weights);
    let age = (as_of - v.business_date).num_days().max(0);

    let manager = v
      .manager_id
      .or_else(|| v.venue_id.and_then(|id| venue_manager.get(&id).copied().flatten()));
    let targets = [
      v.venue_id.map(|id| (ScoredEntity::Venue, id)),
      manager.map(|id| (ScoredEntity::Manager, id)),
    ];
    for (entity, id) in targets.into_iter().flatten() {
      entry(&mut records, entity, id);
      if let Some(r) = records.get_mut(&(entity, id)) {
        r.add(v, points, age);
      }
    }
  }

  records
    .into_values()
    .map(|mut r| {
      r.risk_score = round2(r.risk_score.min(weights.max_score));
      r
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone, Utc};

  use super::*;
  use crate::violation::{ViolationStatus, ViolationType};

  fn as_of() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, 14).unwrap() }

  fn venue(manager: Option<Uuid>) -> Venue {
    Venue {
      venue_id: Uuid::new_v4(),
      org_id: Uuid::nil(),
      name: "v".into(),
      manager_id: manager,
      pos_location_id: None,
    }
  }

  fn violation(venue: &Venue, severity: Severity, days_ago: i64) -> Violation {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    Violation {
      violation_id: Uuid::new_v4(),
      org_id: Uuid::nil(),
      venue_id: Some(venue.venue_id),
      manager_id: None,
      source_id: Uuid::new_v4().to_string(),
      violation_type: ViolationType::CompException,
      severity,
      status: ViolationStatus::Open,
      title: String::new(),
      description: String::new(),
      business_date: as_of() - Duration::days(days_ago),
      escalation_level: 0,
      recurrence_count: 0,
      verification_required: false,
      cross_venue: false,
      silence_penalized: false,
      stall_penalized: false,
      last_escalated_on: None,
      policy_snapshot: serde_json::Value::Null,
      policy_version: None,
      policy_fingerprint: String::new(),
      evidence: serde_json::Value::Null,
      derived_metrics: serde_json::Value::Null,
      estimated_impact_usd: None,
      impact_confidence: None,
      impact_inputs: None,
      created_at: at,
      updated_at: at,
    }
  }

  #[test]
  fn points_add_up() {
    let v0 = venue(None);
    let mut v = violation(&v0, Severity::Critical, 4);
    v.escalation_level = 2;
    v.recurrence_count = 1;
    v.cross_venue = true;
    v.silence_penalized = true;
    // 15 + 10 + 2 + 3 + 10 + 5
    assert_eq!(violation_points(&v, as_of(), &ScoreWeights::default()), 45.0);
  }

  #[test]
  fn venues_and_managers_are_scored_and_capped() {
    let gm = Uuid::new_v4();
    let a = venue(Some(gm));
    let b = venue(None);
    let mut vs: Vec<Violation> =
      (0..10).map(|_| violation(&a, Severity::Critical, 0)).collect();
    vs.push(violation(&b, Severity::Warning, 2));
    let mut closed = violation(&b, Severity::Critical, 0);
    closed.status = ViolationStatus::Closed;
    vs.push(closed);

    let out = score_tenant(Uuid::nil(), &vs, &[a.clone(), b.clone()], as_of(), &ScoreWeights::default());
    assert_eq!(out.len(), 3);

    let manager = out.iter().find(|r| r.entity == ScoredEntity::Manager).unwrap();
    assert_eq!(manager.entity_id, gm);
    assert_eq!(manager.risk_score, 100.0);
    assert_eq!(manager.open_critical, 10);

    let vb = out.iter().find(|r| r.entity_id == b.venue_id).unwrap();
    assert_eq!(vb.risk_score, 6.0);
    assert_eq!(vb.open_warning, 1);
    assert_eq!(vb.open_critical, 0);
    assert_eq!(vb.oldest_open_days, 2);
  }

  #[test]
  fn scoring_is_idempotent() {
    let a = venue(Some(Uuid::new_v4()));
    let vs = vec![violation(&a, Severity::Warning, 3), violation(&a, Severity::Critical, 1)];
    let first = score_tenant(Uuid::nil(), &vs, &[a.clone()], as_of(), &ScoreWeights::default());
    let second = score_tenant(Uuid::nil(), &vs, &[a], as_of(), &ScoreWeights::default());
    assert_eq!(first, second);
  }

  #[test]
  fn violation_manager_overrides_venue_manager() {
    let gm = Uuid::new_v4();
    let approver = Uuid::new_v4();
    let a = venue(Some(gm));
    let mut v = violation(&a, Severity::Warning, 0);
    v.manager_id = Some(approver);
    let out = score_tenant(Uuid::nil(), &[v], &[a], as_of(), &ScoreWeights::default());
    let gm_score = out.iter().find(|r| r.entity_id == gm).unwrap();
    let approver_score = out.iter().find(|r| r.entity_id == approver).unwrap();
    assert_eq!(gm_score.risk_score, 0.0);
    assert_eq!(approver_score.risk_score, 5.0);
  }
}
