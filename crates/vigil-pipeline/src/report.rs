//! Structured run reports.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_core::escalation::EscalationCounts;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCounts {
  pub managers: usize,
  pub venues:   usize,
}

/// Outcome for one tenant. A tenant that failed outright still gets one of
/// these, with the failure in `errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantReport {
  pub org_id:              Uuid,
  pub org_name:            String,
  pub exceptions_detected: usize,
  pub violations_created:  usize,
  pub escalation:          EscalationCounts,
  pub scores:              ScoreCounts,
  pub errors:              Vec<String>,
}

impl TenantReport {
  pub fn new(org_id: Uuid, org_name: impl Into<String>) -> Self {
    Self {
      org_id,
      org_name: org_name.into(),
      exceptions_detected: 0,
      violations_created: 0,
      escalation: EscalationCounts::default(),
      scores: ScoreCounts::default(),
      errors: Vec::new(),
    }
  }

  pub fn failed(org_id: Uuid, org_name: impl Into<String>, error: String) -> Self {
    let mut r = Self::new(org_id, org_name);
    r.errors.push(error);
    r
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  /// True iff `total_errors == 0`.
  pub success:          bool,
  pub business_date:    NaiveDate,
  pub elapsed_ms:       u64,
  pub orgs_processed:   usize,
  pub total_violations: usize,
  pub total_errors:     usize,
  pub results:          Vec<TenantReport>,
  /// Failures outside any single tenant, such as listing the tenants.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors:           Vec<String>,
}

impl RunReport {
  pub fn new(
    business_date: NaiveDate,
    elapsed_ms: u64,
    results: Vec<TenantReport>,
    errors: Vec<String>,
  ) -> Self {
    let total_violations = results.iter().map(|r| r.violations_created).sum();
    let total_errors =
      errors.len() + results.iter().map(|r| r.errors.len()).sum::<usize>();
    Self {
      success: total_errors == 0,
      business_date,
      elapsed_ms,
      orgs_processed: results.len(),
      total_violations,
      total_errors,
      results,
      errors,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn success_requires_zero_errors_anywhere() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
    let mut a = TenantReport::new(Uuid::new_v4(), "a");
    a.violations_created = 3;
    let b = TenantReport::failed(Uuid::new_v4(), "b", "boom".into());

    let ok = RunReport::new(date, 5, vec![a.clone()], Vec::new());
    assert!(ok.success);
    assert_eq!(ok.total_violations, 3);

    let partial = RunReport::new(date, 5, vec![a.clone(), b], Vec::new());
    assert!(!partial.success);
    assert_eq!(partial.total_errors, 1);
    assert_eq!(partial.orgs_processed, 2);

    let listing = RunReport::new(date, 5, Vec::new(), vec!["db down".into()]);
    assert!(!listing.success);
    assert_eq!(listing.total_errors, 1);
  }
}
