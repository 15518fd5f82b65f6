//! Comp detector: per-check policy breaches and the venue's daily comp rate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  exception::{
    Exception, ExceptionKind, ExceptionSeverity, ImpactConfidence,
    ImpactEstimate, round2,
  },
  facts::CompCheck,
  policy::CompPolicy,
};

/// One way a check can breach comp policy.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompAnomaly {
  /// The reason is not on the org's approved list.
  UnapprovedReason,
  /// The reason is approved but capped below the comped amount.
  ReasonCapExceeded,
  HighValue,
  HighPct,
}

/// `round(comp_total / check_total * 100, 2)`; zero for an empty check.
pub fn comp_pct_of_check(check: &CompCheck) -> f64 {
  if check.check_total <= 0.0 {
    return 0.0;
  }
  round2(check.comp_total / check.check_total * 100.0)
}

/// Every anomaly present on `check`, in a fixed order.
pub fn classify_check(check: &CompCheck, policy: &CompPolicy) -> Vec<CompAnomaly> {
  let mut out = Vec::new();
  let reason = check.comp_reason.trim();

  match policy
    .approved_reasons
    .iter()
    .find(|r| r.reason.trim().eq_ignore_ascii_case(reason))
  {
    None => out.push(CompAnomaly::UnapprovedReason),
    Some(r) => {
      if let Some(cap) = r.max_amount
        && check.comp_total > cap
      {
        out.push(CompAnomaly::ReasonCapExceeded);
      }
    }
  }

  if check.comp_total > policy.high_value_comp_threshold {
    out.push(CompAnomaly::HighValue);
  }
  if comp_pct_of_check(check) > policy.high_comp_pct_threshold {
    out.push(CompAnomaly::HighPct);
  }
  out
}

fn check_severity(
  anomalies: &[CompAnomaly],
  check: &CompCheck,
  policy: &CompPolicy,
) -> ExceptionSeverity {
  let unapproved_and_high = anomalies.contains(&CompAnomaly::UnapprovedReason)
    && anomalies.contains(&CompAnomaly::HighValue);
  let very_high = check.comp_total >= 2.0 * policy.high_value_comp_threshold;
  if unapproved_and_high || very_high {
    ExceptionSeverity::Critical
  } else {
    ExceptionSeverity::Warning
  }
}

/// Run the comp detector for one venue and business date.
///
/// `net_sales` enables the daily comp-rate check; pass `None` when the
/// venue has no sales figure for the day.
pub fn detect(
  venue_id: Uuid,
  business_date: NaiveDate,
  checks: &[CompCheck],
  net_sales: Option<f64>,
  policy: &CompPolicy,
) -> Vec<Exception> {
  let mut out = Vec::new();

  for check in checks {
    let anomalies = classify_check(check, policy);
    if anomalies.is_empty() {
      continue;
    }
    let pct = comp_pct_of_check(check);
    let labels: Vec<&str> = anomalies.iter().map(AsRef::as_ref).collect();

    out.push(Exception {
      kind:          ExceptionKind::CompCheck,
      severity:      check_severity(&anomalies, check, policy),
      source_id:     format!("comp_{}_{}", check.check_id, business_date),
      title:         format!(
        "Comp of ${:.2} on check {} ({})",
        check.comp_total, check.check_id, check.comp_reason
      ),
      message:       format!(
        "Check {} comped ${:.2} of ${:.2} ({pct}%) for \"{}\": {}",
        check.check_id,
        check.comp_total,
        check.check_total,
        check.comp_reason,
        labels.join(", ")
      ),
      metric_values: [
        ("comp_total".to_owned(), check.comp_total),
        ("check_total".to_owned(), check.check_total),
        ("comp_pct_of_check".to_owned(), pct),
      ]
      .into_iter()
      .collect(),
      diagnostic:    None,
      evidence:      serde_json::json!({
        "check":     check,
        "anomalies": anomalies,
      }),
      impact:        Some(ImpactEstimate {
        usd:        round2(check.comp_total),
        confidence: ImpactConfidence::High,
        inputs:     serde_json::json!({ "comp_total": check.comp_total }),
      }),
      manager_id:    check.approved_by,
    });
  }

  if let Some(sales) = net_sales.filter(|s| *s > 0.0) {
    let total: f64 = checks.iter().map(|c| c.comp_total).sum();
    let daily_pct = round2(total / sales * 100.0);
    let severity = if daily_pct >= policy.daily_comp_pct_critical {
      Some(ExceptionSeverity::Critical)
    } else if daily_pct >= policy.daily_comp_pct_warning {
      Some(ExceptionSeverity::Warning)
    } else {
      None
    };

    if let Some(severity) = severity {
      out.push(Exception {
        kind: ExceptionKind::CompDailyPct,
        severity,
        source_id: format!("comp_daily_{venue_id}_{business_date}"),
        title: format!("Daily comps at {daily_pct}% of net sales"),
        message: format!(
          "Comps totalled ${total:.2} against ${sales:.2} net sales \
           ({daily_pct}%; warning at {}%, critical at {}%)",
          policy.daily_comp_pct_warning, policy.daily_comp_pct_critical
        ),
        metric_values: [
          ("comp_total".to_owned(), round2(total)),
          ("net_sales".to_owned(), sales),
          ("daily_comp_pct".to_owned(), daily_pct),
        ]
        .into_iter()
        .collect(),
        diagnostic: None,
        evidence: serde_json::json!({ "check_count": checks.len() }),
        impact: None,
        manager_id: None,
      });
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::ApprovedReason;

  fn date() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, 14).unwrap() }

  fn check(id: &str, total: f64, comp: f64, reason: &str) -> CompCheck {
    CompCheck {
      check_id:      id.into(),
      venue_id:      Uuid::nil(),
      business_date: date(),
      check_total:   total,
      comp_total:    comp,
      comp_reason:   reason.into(),
      server_name:   None,
      approved_by:   None,
    }
  }

  fn policy() -> CompPolicy {
    CompPolicy {
      approved_reasons: vec![
        ApprovedReason { reason: "Spill".into(), max_amount: Some(50.0) },
        ApprovedReason { reason: "Manager Meal".into(), max_amount: None },
      ],
      high_value_comp_threshold: 200.0,
      ..CompPolicy::default()
    }
  }

  #[test]
  fn spill_over_cap_is_one_warning() {
    let checks = [check("1001", 400.0, 120.0, "Spill")];
    let out = detect(Uuid::nil(), date(), &checks, None, &policy());

    assert_eq!(out.len(), 1);
    let e = &out[0];
    assert_eq!(e.kind, ExceptionKind::CompCheck);
    assert_eq!(e.severity, ExceptionSeverity::Warning);
    assert_eq!(e.source_id, "comp_1001_2024-03-14");
    assert_eq!(e.metric_values["comp_pct_of_check"], 30.0);
    assert_eq!(e.evidence["anomalies"], serde_json::json!(["reason_cap_exceeded"]));
  }

  #[test]
  fn pct_is_rounded_to_two_places() {
    let c = check("1", 300.0, 100.0, "Spill");
    assert_eq!(comp_pct_of_check(&c), 33.33);
    assert_eq!(comp_pct_of_check(&check("2", 0.0, 10.0, "Spill")), 0.0);
  }

  #[test]
  fn approved_reason_within_cap_is_clean() {
    let checks = [
      check("1", 400.0, 40.0, "spill"),
      check("2", 400.0, 150.0, "Manager Meal"),
    ];
    assert!(detect(Uuid::nil(), date(), &checks, None, &policy()).is_empty());
  }

  #[test]
  fn unapproved_high_value_is_critical() {
    let checks = [check("9", 2000.0, 250.0, "Friend of owner")];
    let out = detect(Uuid::nil(), date(), &checks, None, &policy());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].severity, ExceptionSeverity::Critical);
    assert_eq!(
      classify_check(&checks[0], &policy()),
      vec![CompAnomaly::UnapprovedReason, CompAnomaly::HighValue]
    );
  }

  #[test]
  fn unapproved_low_value_is_warning() {
    let checks = [check("9", 100.0, 10.0, "Birthday")];
    let out = detect(Uuid::nil(), date(), &checks, None, &policy());
    assert_eq!(out[0].severity, ExceptionSeverity::Warning);
  }

  #[test]
  fn daily_rate_uses_warning_and_critical_bands() {
    let checks = [check("1", 100.0, 30.0, "Manager Meal")];
    // 30 / 1000 = 3% → critical at the default 3% band.
    let out = detect(Uuid::nil(), date(), &checks, Some(1000.0), &policy());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, ExceptionKind::CompDailyPct);
    assert_eq!(out[0].severity, ExceptionSeverity::Critical);

    // 30 / 1200 = 2.5% → warning.
    let out = detect(Uuid::nil(), date(), &checks, Some(1200.0), &policy());
    assert_eq!(out[0].severity, ExceptionSeverity::Warning);

    // No sales figure → no daily check.
    assert!(detect(Uuid::nil(), date(), &checks, None, &policy()).is_empty());
  }

  #[test]
  fn no_checks_no_exceptions() {
    assert!(detect(Uuid::nil(), date(), &[], Some(5000.0), &policy()).is_empty());
  }
}
