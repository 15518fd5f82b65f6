//! Org-scoped policy families and the cached policy store.
//!
//! Policy rows are stored as versioned JSON blobs per `(org, family)`. They
//! are decoded at this boundary into explicit structs; absent fields take the
//! defaults below, and a blob that does not fit its family's shape is
//! rejected rather than passed along untyped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  cache::{Clock, TtlCache},
  store::{PolicySettings, StoredPolicy},
};

// ─── Families ────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::AsRefStr,
  strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyFamily {
  Comp,
  Labor,
  Procurement,
  Escalation,
}


/// A comp reason the org allows, optionally capped per check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedReason {
  pub reason:     String,
  #[serde(default)]
  pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompPolicy {
  pub approved_reasons:          Vec<ApprovedReason>,
  /// Any single check comped above this dollar amount is flagged.
  pub high_value_comp_threshold: f64,
  /// Any check comped above this percentage of its total is flagged.
  pub high_comp_pct_threshold:   f64,
  /// Venue-wide comps as a percentage of net sales.
  pub daily_comp_pct_warning:    f64,
  pub daily_comp_pct_critical:   f64,
}

impl Default for CompPolicy {
  fn default() -> Self {
    Self {
      approved_reasons:          Vec::new(),
      high_value_comp_threshold: 200.0,
      high_comp_pct_threshold:   50.0,
      daily_comp_pct_warning:    2.0,
      daily_comp_pct_critical:   3.0,
    }
  }
}

/// Org-calibrated labor targets (layer 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaborStandards {
  pub splh_floor:          f64,
  pub cplh_target:         f64,
  pub cplh_tolerance:      f64,
  pub target_labor_pct:    f64,
  pub labor_pct_tolerance: f64,
  pub ot_warning_pct:      f64,
  pub ot_critical_pct:     f64,
}

impl Default for LaborStandards {
  fn default() -> Self {
    Self {
      splh_floor:          70.0,
      cplh_target:         5.0,
      cplh_tolerance:      0.5,
      target_labor_pct:    28.0,
      labor_pct_tolerance: 3.0,
      ot_warning_pct:      15.0,
      ot_critical_pct:     25.0,
    }
  }
}

/// Thresholds for the structural-pattern check over a venue's recent labor
/// exceptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralBounds {
  pub short_window_days:         i64,
  pub short_window_threshold:    usize,
  pub long_window_days:          i64,
  pub long_window_threshold:     usize,
  pub critical_window_threshold: usize,
}

impl Default for StructuralBounds {
  fn default() -> Self {
    Self {
      short_window_days:         7,
      short_window_threshold:    3,
      long_window_days:          14,
      long_window_threshold:     5,
      critical_window_threshold: 2,
    }
  }
}

/// System-wide labor bounds (layer 0). Not org-configurable: breaching
/// one is critical whatever the org's standards say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaborBounds {
  pub max_labor_pct:            f64,
  pub splh_critical_multiplier: f64,
  pub cplh_critical_tolerance:  f64,
  pub max_ot_pct:               f64,
  pub structural:               StructuralBounds,
}

impl Default for LaborBounds {
  fn default() -> Self {
    Self {
      max_labor_pct:            40.0,
      splh_critical_multiplier: 0.8,
      cplh_critical_tolerance:  1.5,
      max_ot_pct:               30.0,
      structural:               StructuralBounds::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcurementPolicy {
  pub cost_spike_lookback_days:   i64,
  pub cost_spike_min_history:     usize,
  pub cost_spike_z_threshold:     f64,
  pub cost_spike_critical_z:      f64,
  pub shrink_lookback_days:       i64,
  pub shrink_warning_usd:         f64,
  pub shrink_critical_usd:        f64,
  pub shrink_top_n:               usize,
  pub recipe_drift_lookback_days: i64,
  pub recipe_drift_warning_pct:   f64,
  pub recipe_drift_critical_pct:  f64,
}

impl Default for ProcurementPolicy {
  fn default() -> Self {
    Self {
      cost_spike_lookback_days:   90,
      cost_spike_min_history:     5,
      cost_spike_z_threshold:     2.0,
      cost_spike_critical_z:      3.5,
      shrink_lookback_days:       7,
      shrink_warning_usd:         250.0,
      shrink_critical_usd:        1000.0,
      shrink_top_n:               5,
      recipe_drift_lookback_days: 7,
      recipe_drift_warning_pct:   5.0,
      recipe_drift_critical_pct:  15.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
  /// Business days an unresolved violation sits before each time step.
  pub escalate_after_days:      i64,
  pub max_level:                u32,
  pub recurrence_lookback_days: i64,
  pub systemic_window_days:     i64,
  pub systemic_min_venues:      usize,
  pub systemic_min_count:       usize,
  pub silence_grace_hours:      i64,
  pub stall_sla_hours:          i64,
}

impl Default for EscalationPolicy {
  fn default() -> Self {
    Self {
      escalate_after_days:      3,
      max_level:                3,
      recurrence_lookback_days: 30,
      systemic_window_days:     14,
      systemic_min_venues:      2,
      systemic_min_count:       3,
      silence_grace_hours:      48,
      stall_sla_hours:          72,
    }
  }
}

// ─── Decoded bundle ──────────────────────────────────────────────────────────

/// A decoded policy family together with the stored version it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
  pub version: i64,
  pub policy:  T,
}

impl<T: Serialize> Versioned<T> {
  /// The exact values in effect, for stamping onto a violation.
  pub fn snapshot(&self, family: PolicyFamily) -> serde_json::Value {
    serde_json::json!({
      "family":   family.as_ref(),
      "version":  self.version,
      "settings": self.policy,
    })
  }
}

/// Everything the pipeline needs to know about one org's configuration.
#[derive(Debug, Clone)]
pub struct OrgPolicy {
  pub org_id:      Uuid,
  pub loaded_at:   DateTime<Utc>,
  pub comp:        Option<Versioned<CompPolicy>>,
  pub labor:       Option<Versioned<LaborStandards>>,
  pub procurement: Option<Versioned<ProcurementPolicy>>,
  /// Falls back to defaults when the org has never saved one.
  pub escalation:  EscalationPolicy,
}

/// SHA-256 hex digest of a policy snapshot. `serde_json` maps are ordered,
/// so equal snapshots always hash equally.
pub fn fingerprint(snapshot: &serde_json::Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(snapshot.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

fn decode<T: DeserializeOwned>(
  org_id: Uuid,
  family: PolicyFamily,
  value: &serde_json::Value,
) -> Result<T> {
  serde_json::from_value(value.clone()).map_err(|source| Error::PolicyDecode {
    org_id,
    family,
    source,
  })
}

/// Validate a settings blob against its family's shape without storing it.
pub fn validate(
  org_id: Uuid,
  family: PolicyFamily,
  value: &serde_json::Value,
) -> Result<()> {
  match family {
    PolicyFamily::Comp => decode::<CompPolicy>(org_id, family, value).map(drop),
    PolicyFamily::Labor => {
      decode::<LaborStandards>(org_id, family, value).map(drop)
    }
    PolicyFamily::Procurement => {
      decode::<ProcurementPolicy>(org_id, family, value).map(drop)
    }
    PolicyFamily::Escalation => {
      decode::<EscalationPolicy>(org_id, family, value).map(drop)
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Read-through cache over a [`PolicySettings`] backend, keyed by org.
pub struct PolicyStore<S> {
  source: Arc<S>,
  cache:  TtlCache<Uuid, Arc<OrgPolicy>>,
  clock:  Arc<dyn Clock>,
}

impl<S: PolicySettings> PolicyStore<S> {
  pub fn new(source: Arc<S>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self { source, cache: TtlCache::new(ttl, clock.clone()), clock }
  }

  /// Return the org's policy, from cache if it is fresh enough.
  pub async fn load(&self, org_id: Uuid) -> Result<Arc<OrgPolicy>> {
    if let Some(hit) = self.cache.get(&org_id) {
      return Ok(hit);
    }

    let as_of = self.clock.now();
    let policy = Arc::new(OrgPolicy {
      org_id,
      loaded_at: as_of,
      comp: self.fetch(org_id, PolicyFamily::Comp, as_of).await?,
      labor: self.fetch(org_id, PolicyFamily::Labor, as_of).await?,
      procurement: self.fetch(org_id, PolicyFamily::Procurement, as_of).await?,
      escalation: self
        .fetch::<EscalationPolicy>(org_id, PolicyFamily::Escalation, as_of)
        .await?
        .map(|v| v.policy)
        .unwrap_or_default(),
    });

    self.cache.insert(org_id, policy.clone());
    Ok(policy)
  }

  /// Persist a new version of one family and drop the org's cached entry.
  pub async fn update(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    settings: serde_json::Value,
  ) -> Result<StoredPolicy> {
    validate(org_id, family, &settings)?;
    let stored = self
      .source
      .save_policy(org_id, family, settings, self.clock.now())
      .await
      .map_err(Error::store)?;
    self.cache.invalidate(&org_id);
    Ok(stored)
  }

  pub fn invalidate(&self, org_id: Uuid) { self.cache.invalidate(&org_id); }

  async fn fetch<T: DeserializeOwned>(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    as_of: DateTime<Utc>,
  ) -> Result<Option<Versioned<T>>> {
    let Some(stored) = self
      .source
      .active_policy(org_id, family, as_of)
      .await
      .map_err(Error::store)?
    else {
      return Ok(None);
    };
    Ok(Some(Versioned {
      version: stored.version,
      policy:  decode(org_id, family, &stored.settings)?,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_blob_fills_defaults() {
    let v = serde_json::json!({ "splh_floor": 65.0 });
    let std: LaborStandards = decode(Uuid::nil(), PolicyFamily::Labor, &v).unwrap();
    assert_eq!(std.splh_floor, 65.0);
    assert_eq!(std.cplh_target, LaborStandards::default().cplh_target);
  }

  #[test]
  fn wrong_shape_is_rejected() {
    let v = serde_json::json!({ "splh_floor": "seventy" });
    let err = validate(Uuid::nil(), PolicyFamily::Labor, &v).unwrap_err();
    assert!(matches!(err, Error::PolicyDecode { family: PolicyFamily::Labor, .. }));
  }

  #[test]
  fn fingerprint_is_stable_and_sensitive() {
    let a = Versioned { version: 1, policy: CompPolicy::default() };
    let mut b = a.clone();
    assert_eq!(
      fingerprint(&a.snapshot(PolicyFamily::Comp)),
      fingerprint(&b.snapshot(PolicyFamily::Comp))
    );
    b.policy.high_value_comp_threshold = 150.0;
    assert_ne!(
      fingerprint(&a.snapshot(PolicyFamily::Comp)),
      fingerprint(&b.snapshot(PolicyFamily::Comp))
    );
  }

  #[test]
  fn family_round_trips_through_strum() {
    use std::str::FromStr as _;
    for f in [
      PolicyFamily::Comp,
      PolicyFamily::Labor,
      PolicyFamily::Procurement,
      PolicyFamily::Escalation,
    ] {
      assert_eq!(PolicyFamily::from_str(f.as_ref()).unwrap(), f);
      assert_eq!(serde_json::to_value(f).unwrap(), f.as_ref());
    }
  }
}
