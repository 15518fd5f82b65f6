//! Labor detector.
//!
//! SPLH and CPLH are never judged alone: the pair is first classified into a
//! [`LaborDiagnostic`], and every exception carries that diagnostic. Two
//! tiers of thresholds then apply per metric:
//!
//! - layer 0, [`LaborBounds`]: system-wide, always critical;
//! - layer 1, [`LaborStandards`]: org-calibrated, warning unless layer 0
//!   already fired.
//!
//! Finally the day's findings are set against the venue's recent labor
//! history to decide whether they are part of a structural pattern.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
  exception::{
    Exception, ExceptionKind, ExceptionSeverity, ImpactConfidence,
    ImpactEstimate, LaborDiagnostic, round2,
  },
  facts::LaborDay,
  policy::{LaborBounds, LaborStandards, StructuralBounds},
};

// ─── Metrics ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaborMetrics {
  /// `labor_cost / net_sales * 100`
  pub labor_pct: f64,
  /// Sales per labor hour.
  pub splh:      f64,
  /// Covers per labor hour.
  pub cplh:      f64,
  /// `ot_hours / labor_hours * 100`
  pub ot_pct:    f64,
}

impl LaborMetrics {
  /// `None` when the day has no hours or no sales to divide by.
  pub fn compute(day: &LaborDay) -> Option<Self> {
    if day.labor_hours <= 0.0 || day.net_sales <= 0.0 {
      return None;
    }
    Some(Self {
      labor_pct: day.labor_cost / day.net_sales * 100.0,
      splh:      day.net_sales / day.labor_hours,
      cplh:      day.covers / day.labor_hours,
      ot_pct:    day.ot_hours / day.labor_hours * 100.0,
    })
  }

  fn rounded(&self) -> [(&'static str, f64); 4] {
    [
      ("labor_pct", round2(self.labor_pct)),
      ("splh", round2(self.splh)),
      ("cplh", round2(self.cplh)),
      ("ot_pct", round2(self.ot_pct)),
    ]
  }
}

/// Classify the SPLH/CPLH pair.
///
/// | SPLH ≥ floor | CPLH ≥ target − tolerance | diagnostic |
/// |---|---|---|
/// | no  | no  | `OverstaffedSlow` |
/// | no  | yes | `OverstaffedBusy` |
/// | yes | no  | `UnderstaffedOrPacing` |
/// | yes | yes | `Efficient` |
pub fn classify(splh: f64, cplh: f64, standards: &LaborStandards) -> LaborDiagnostic {
  let splh_ok = splh >= standards.splh_floor;
  let cplh_ok = cplh >= standards.cplh_target - standards.cplh_tolerance;
  match (splh_ok, cplh_ok) {
    (false, false) => LaborDiagnostic::OverstaffedSlow,
    (false, true) => LaborDiagnostic::OverstaffedBusy,
    (true, false) => LaborDiagnostic::UnderstaffedOrPacing,
    (true, true) => LaborDiagnostic::Efficient,
  }
}

// ─── Structural triggers ─────────────────────────────────────────────────────

/// One past or present labor finding for a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub business_date: NaiveDate,
  pub critical:      bool,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StructuralTrigger {
  ShortWindowVolume,
  LongWindowVolume,
  ShortWindowCritical,
}

fn within(entry: &HistoryEntry, business_date: NaiveDate, days: i64) -> bool {
  let start = business_date - Duration::days(days - 1);
  entry.business_date >= start && entry.business_date <= business_date
}

/// Which structural triggers fire for `history` as of `business_date`.
///
/// Windows are inclusive of `business_date`, so a 7-day window covers the
/// day itself and the six before it.
pub fn structural_triggers(
  history: &[HistoryEntry],
  business_date: NaiveDate,
  bounds: &StructuralBounds,
) -> Vec<StructuralTrigger> {
  let short = history
    .iter()
    .filter(|e| within(e, business_date, bounds.short_window_days));
  let short_total = short.clone().count();
  let short_critical = short.filter(|e| e.critical).count();
  let long_total = history
    .iter()
    .filter(|e| within(e, business_date, bounds.long_window_days))
    .count();

  let mut fired = Vec::new();
  if short_total >= bounds.short_window_threshold {
    fired.push(StructuralTrigger::ShortWindowVolume);
  }
  if long_total >= bounds.long_window_threshold {
    fired.push(StructuralTrigger::LongWindowVolume);
  }
  if short_critical >= bounds.critical_window_threshold {
    fired.push(StructuralTrigger::ShortWindowCritical);
  }
  fired
}

// ─── Detector ────────────────────────────────────────────────────────────────

struct Finding {
  kind:      ExceptionKind,
  severity:  ExceptionSeverity,
  layer:     u8,
  value:     f64,
  threshold: f64,
  what:      &'static str,
}

fn evaluate(
  m: &LaborMetrics,
  standards: &LaborStandards,
  bounds: &LaborBounds,
) -> Vec<Finding> {
  let mut out = Vec::new();
  let mut push = |kind, severity, layer, value, threshold, what| {
    out.push(Finding { kind, severity, layer, value, threshold, what })
  };
  use ExceptionKind::*;
  use ExceptionSeverity::*;

  let labor_ceiling = standards.target_labor_pct + standards.labor_pct_tolerance;
  if m.labor_pct > bounds.max_labor_pct {
    push(LaborPctHigh, Critical, 0, m.labor_pct, bounds.max_labor_pct, "labor %");
  } else if m.labor_pct > labor_ceiling {
    push(LaborPctHigh, Warning, 1, m.labor_pct, labor_ceiling, "labor %");
  }

  let splh_critical = standards.splh_floor * bounds.splh_critical_multiplier;
  if m.splh < splh_critical {
    push(SplhLow, Critical, 0, m.splh, splh_critical, "SPLH");
  } else if m.splh < standards.splh_floor {
    push(SplhLow, Warning, 1, m.splh, standards.splh_floor, "SPLH");
  }

  let cplh_critical = standards.cplh_target - bounds.cplh_critical_tolerance;
  let cplh_floor = standards.cplh_target - standards.cplh_tolerance;
  if m.cplh < cplh_critical {
    push(CplhLow, Critical, 0, m.cplh, cplh_critical, "CPLH");
  } else if m.cplh < cplh_floor {
    push(CplhLow, Warning, 1, m.cplh, cplh_floor, "CPLH");
  }

  if m.ot_pct > bounds.max_ot_pct {
    push(OvertimeHigh, Critical, 0, m.ot_pct, bounds.max_ot_pct, "OT %");
  } else if m.ot_pct > standards.ot_critical_pct {
    push(OvertimeHigh, Critical, 1, m.ot_pct, standards.ot_critical_pct, "OT %");
  } else if m.ot_pct > standards.ot_warning_pct {
    push(OvertimeHigh, Warning, 1, m.ot_pct, standards.ot_warning_pct, "OT %");
  }

  out
}

/// Run the labor detector for one venue-day.
///
/// `history` holds the venue's earlier labor findings (structural ones
/// excluded); today's findings are added to it before the structural check.
pub fn detect(
  day: &LaborDay,
  standards: &LaborStandards,
  bounds: &LaborBounds,
  history: &[HistoryEntry],
) -> Vec<Exception> {
  let Some(metrics) = LaborMetrics::compute(day) else {
    return Vec::new();
  };
  let diagnostic = classify(metrics.splh, metrics.cplh, standards);
  let date = day.business_date;
  let venue = day.venue_id;

  let mut out: Vec<Exception> = evaluate(&metrics, standards, bounds)
    .into_iter()
    .map(|f| {
      let mut metric_values: std::collections::BTreeMap<String, f64> = metrics
        .rounded()
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
      metric_values.insert("threshold".to_owned(), round2(f.threshold));

      let impact = (f.kind == ExceptionKind::LaborPctHigh).then(|| {
        let excess = (metrics.labor_pct - standards.target_labor_pct) / 100.0;
        ImpactEstimate {
          usd:        round2(excess * day.net_sales),
          confidence: ImpactConfidence::Medium,
          inputs:     serde_json::json!({
            "labor_pct":        round2(metrics.labor_pct),
            "target_labor_pct": standards.target_labor_pct,
            "net_sales":        day.net_sales,
          }),
        }
      });

      Exception {
        kind: f.kind,
        severity: f.severity,
        source_id: format!("labor_{venue}_{}_{date}", f.kind.as_ref()),
        title: format!("{} {:.2} breaches {:.2}", f.what, f.value, f.threshold),
        message: format!(
          "{} was {:.2} against a layer-{} threshold of {:.2} \
           (diagnostic {diagnostic:?})",
          f.what, f.value, f.layer, f.threshold
        ),
        metric_values,
        diagnostic: Some(diagnostic),
        evidence: serde_json::json!({ "day": day, "layer": f.layer }),
        impact,
        manager_id: None,
      }
    })
    .collect();

  if out.is_empty() {
    return out;
  }

  let mut combined: Vec<HistoryEntry> = history
    .iter()
    .copied()
    .filter(|e| e.business_date < date)
    .collect();
  combined.extend(out.iter().map(|e| HistoryEntry {
    business_date: date,
    critical:      e.severity >= ExceptionSeverity::Critical,
  }));

  let triggers = structural_triggers(&combined, date, &bounds.structural);
  if !triggers.is_empty() {
    let s = &bounds.structural;
    let count_in = |days: i64| {
      combined.iter().filter(|e| within(e, date, days)).count() as f64
    };
    let names: Vec<&str> = triggers.iter().map(|t| t.as_ref()).collect();
    out.push(Exception {
      kind:          ExceptionKind::StructuralPattern,
      severity:      ExceptionSeverity::Structural,
      source_id:     format!("labor_{venue}_structural_pattern_{date}"),
      title:         "Recurring labor exceptions need structural review".into(),
      message:       format!(
        "Today's labor findings are part of a pattern: {}",
        names.join(", ")
      ),
      metric_values: [
        ("short_window_count".to_owned(), count_in(s.short_window_days)),
        ("long_window_count".to_owned(), count_in(s.long_window_days)),
      ]
      .into_iter()
      .collect(),
      diagnostic:    Some(diagnostic),
      evidence:      serde_json::json!({
        "triggers": triggers,
        "bounds":   s,
      }),
      impact:        None,
      manager_id:    None,
    });
  }

  out
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  fn date() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, 14).unwrap() }

  fn day(net_sales: f64, labor_cost: f64, hours: f64, covers: f64, ot: f64) -> LaborDay {
    LaborDay {
      venue_id: Uuid::nil(),
      business_date: date(),
      net_sales,
      labor_cost,
      labor_hours: hours,
      covers,
      ot_hours: ot,
    }
  }

  fn scenario_standards() -> LaborStandards {
    LaborStandards {
      splh_floor: 70.0,
      cplh_target: 5.0,
      cplh_tolerance: 0.5,
      target_labor_pct: 28.0,
      labor_pct_tolerance: 3.0,
      ..LaborStandards::default()
    }
  }

  fn entries(days_ago: &[i64], critical: bool) -> Vec<HistoryEntry> {
    days_ago
      .iter()
      .map(|d| HistoryEntry {
        business_date: date() - Duration::days(*d),
        critical,
      })
      .collect()
  }

  #[test]
  fn diagnostic_matrix_at_boundaries() {
    let s = scenario_standards();
    let cplh_edge = s.cplh_target - s.cplh_tolerance;
    assert_eq!(classify(70.0, cplh_edge, &s), LaborDiagnostic::Efficient);
    assert_eq!(classify(69.99, cplh_edge, &s), LaborDiagnostic::OverstaffedBusy);
    assert_eq!(classify(70.0, 4.49, &s), LaborDiagnostic::UnderstaffedOrPacing);
    assert_eq!(classify(69.99, 4.49, &s), LaborDiagnostic::OverstaffedSlow);
  }

  #[test]
  fn efficient_day_can_still_breach_labor_pct() {
    let d = day(10_000.0, 3_200.0, 120.0, 600.0, 15.0);
    let m = LaborMetrics::compute(&d).unwrap();
    assert_eq!(round2(m.labor_pct), 32.0);
    assert_eq!(round2(m.splh), 83.33);
    assert_eq!(round2(m.cplh), 5.0);

    let out = detect(&d, &scenario_standards(), &LaborBounds::default(), &[]);
    assert_eq!(out.len(), 1);
    let e = &out[0];
    assert_eq!(e.kind, ExceptionKind::LaborPctHigh);
    assert_eq!(e.severity, ExceptionSeverity::Warning);
    assert_eq!(e.diagnostic, Some(LaborDiagnostic::Efficient));
    assert_eq!(e.metric_values["threshold"], 31.0);
    assert_eq!(e.impact.as_ref().unwrap().usd, 400.0);
  }

  #[test]
  fn layer_zero_overrides_org_tier() {
    // 45% labor breaches the 40% system ceiling; SPLH 40 < 70 * 0.8.
    let d = day(4_000.0, 1_800.0, 100.0, 450.0, 0.0);
    let out = detect(&d, &scenario_standards(), &LaborBounds::default(), &[]);
    let labor = out.iter().find(|e| e.kind == ExceptionKind::LaborPctHigh).unwrap();
    let splh = out.iter().find(|e| e.kind == ExceptionKind::SplhLow).unwrap();
    assert_eq!(labor.severity, ExceptionSeverity::Critical);
    assert_eq!(splh.severity, ExceptionSeverity::Critical);
    assert!(out.iter().all(|e| e.diagnostic == Some(LaborDiagnostic::OverstaffedBusy)));
  }

  #[test]
  fn missing_hours_or_sales_yield_nothing() {
    let s = scenario_standards();
    let b = LaborBounds::default();
    assert!(detect(&day(10_000.0, 3_200.0, 0.0, 600.0, 0.0), &s, &b, &[]).is_empty());
    assert!(detect(&day(0.0, 3_200.0, 120.0, 600.0, 0.0), &s, &b, &[]).is_empty());
  }

  #[test]
  fn short_window_needs_three() {
    let b = StructuralBounds::default();
    assert!(structural_triggers(&entries(&[0, 3], false), date(), &b).is_empty());
    assert_eq!(
      structural_triggers(&entries(&[0, 3, 6], false), date(), &b),
      vec![StructuralTrigger::ShortWindowVolume]
    );
    // Seven days ago is outside the 7-day window.
    assert!(structural_triggers(&entries(&[0, 3, 7], false), date(), &b).is_empty());
  }

  #[test]
  fn long_window_needs_five() {
    let b = StructuralBounds::default();
    let four = entries(&[0, 5, 9, 12], false);
    assert!(structural_triggers(&four, date(), &b).is_empty());
    let five = entries(&[0, 5, 9, 12, 13], false);
    assert_eq!(
      structural_triggers(&five, date(), &b),
      vec![StructuralTrigger::LongWindowVolume]
    );
  }

  #[test]
  fn critical_window_needs_two() {
    let b = StructuralBounds::default();
    let one = entries(&[2], true);
    assert!(structural_triggers(&one, date(), &b).is_empty());
    let two = entries(&[0, 2], true);
    assert_eq!(
      structural_triggers(&two, date(), &b),
      vec![StructuralTrigger::ShortWindowCritical]
    );
  }

  #[test]
  fn structural_exception_is_appended_when_history_fires() {
    let d = day(10_000.0, 3_200.0, 120.0, 600.0, 15.0);
    let history = entries(&[1, 2], false);
    let out = detect(&d, &scenario_standards(), &LaborBounds::default(), &history);
    assert_eq!(out.len(), 2);
    let s = &out[1];
    assert_eq!(s.kind, ExceptionKind::StructuralPattern);
    assert_eq!(s.severity, ExceptionSeverity::Structural);
    assert_eq!(s.metric_values["short_window_count"], 3.0);
    assert!(s.source_id.ends_with("_structural_pattern_2024-03-14"));
  }

  #[test]
  fn clean_day_never_goes_structural() {
    let d = day(10_000.0, 2_800.0, 120.0, 600.0, 5.0);
    let history = entries(&[1, 2, 3, 4, 5], true);
    assert!(detect(&d, &scenario_standards(), &LaborBounds::default(), &history).is_empty());
  }
}
