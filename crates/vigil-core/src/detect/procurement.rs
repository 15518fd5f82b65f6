//! Procurement and inventory detectors.
//!
//! Five independent checks. Each takes only its own inputs so the caller can
//! fetch and run them in isolation: a failed fetch for one never stops the
//! others.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  exception::{
    Exception, ExceptionKind, ExceptionSeverity, ImpactConfidence,
    ImpactEstimate, round2,
  },
  facts::{
    CostEntry, InventoryBalance, InventoryCount, InvoiceVariance, ParLevel,
    RecipeCostSnapshot, VarianceSeverity,
  },
  policy::ProcurementPolicy,
};

fn metrics<const N: usize>(pairs: [(&str, f64); N]) -> BTreeMap<String, f64> {
  pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

// ─── Cost spikes ─────────────────────────────────────────────────────────────

/// Mean and population standard deviation. `None` for an empty slice.
pub fn mean_and_stddev(values: &[f64]) -> Option<(f64, f64)> {
  if values.is_empty() {
    return None;
  }
  let n = values.len() as f64;
  let mean = values.iter().sum::<f64>() / n;
  let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
  Some((mean, var.sqrt()))
}

/// The first date of the lookback window ending the day before
/// `business_date`.
pub fn cost_history_start(business_date: NaiveDate, policy: &ProcurementPolicy) -> NaiveDate {
  business_date - Duration::days(policy.cost_spike_lookback_days)
}

/// Flag items whose cost on `business_date` sits at least
/// `cost_spike_z_threshold` standard deviations from their trailing mean.
///
/// `entries` may contain the whole lookback window plus the day itself.
/// Items with too little history or zero variance are skipped.
pub fn cost_spikes(
  venue_id: Uuid,
  business_date: NaiveDate,
  entries: &[CostEntry],
  policy: &ProcurementPolicy,
) -> Vec<Exception> {
  let start = cost_history_start(business_date, policy);

  // Latest same-day entry per item wins; input order is the tiebreak.
  let mut today: BTreeMap<&str, &CostEntry> = BTreeMap::new();
  let mut history: HashMap<&str, Vec<f64>> = HashMap::new();
  for e in entries {
    if e.business_date == business_date {
      today.insert(&e.item_id, e);
    } else if e.business_date >= start && e.business_date < business_date {
      history.entry(&e.item_id).or_default().push(e.unit_cost);
    }
  }

  let mut out = Vec::new();
  for (item_id, entry) in today {
    let Some(past) = history.get(item_id) else { continue };
    if past.len() < policy.cost_spike_min_history {
      continue;
    }
    let Some((mean, sd)) = mean_and_stddev(past) else { continue };
    if sd == 0.0 || !sd.is_finite() {
      continue;
    }
    let z = (entry.unit_cost - mean) / sd;
    if z.abs() < policy.cost_spike_z_threshold {
      continue;
    }
    let severity = if z.abs() >= policy.cost_spike_critical_z {
      ExceptionSeverity::Critical
    } else {
      ExceptionSeverity::Warning
    };

    out.push(Exception {
      kind: ExceptionKind::CostSpike,
      severity,
      source_id: format!("cost_spike_{venue_id}_{item_id}_{business_date}"),
      title: format!("Cost spike on {}", entry.item_name),
      message: format!(
        "{} cost ${:.2} against a {}-point mean of ${mean:.2} (z = {z:.2})",
        entry.item_name,
        entry.unit_cost,
        past.len()
      ),
      metric_values: metrics([
        ("unit_cost", entry.unit_cost),
        ("mean", round2(mean)),
        ("stddev", round2(sd)),
        ("z_score", round2(z)),
        ("history_points", past.len() as f64),
      ]),
      diagnostic: None,
      evidence: serde_json::json!({ "entry": entry, "history": past }),
      impact: None,
      manager_id: None,
    });
  }
  out
}

// ─── Invoice variances ───────────────────────────────────────────────────────

/// Surface unresolved variance records at their recorded severity.
/// Informational records are not violations.
pub fn invoice_variances(variances: &[InvoiceVariance]) -> Vec<Exception> {
  variances
    .iter()
    .filter_map(|v| {
      let severity = match v.severity {
        VarianceSeverity::Info => return None,
        VarianceSeverity::Warning => ExceptionSeverity::Warning,
        VarianceSeverity::Critical => ExceptionSeverity::Critical,
      };
      let what = v.item_name.as_deref().unwrap_or("invoice total");
      Some(Exception {
        kind: ExceptionKind::InvoiceVariance,
        severity,
        source_id: format!("invoice_variance_{}", v.variance_id),
        title: format!("Unresolved invoice variance on {what}"),
        message: format!(
          "Invoice {} from {} is off by ${:.2} ({:.1}%) and has not been resolved",
          v.invoice_id,
          v.vendor_name.as_deref().unwrap_or("unknown vendor"),
          v.variance_usd,
          v.variance_pct
        ),
        metric_values: metrics([
          ("variance_usd", v.variance_usd),
          ("variance_pct", v.variance_pct),
        ]),
        diagnostic: None,
        evidence: serde_json::json!({ "variance": v }),
        impact: Some(ImpactEstimate {
          usd:        round2(v.variance_usd.abs()),
          confidence: ImpactConfidence::High,
          inputs:     serde_json::json!({ "variance_usd": v.variance_usd }),
        }),
        manager_id: None,
      })
    })
    .collect()
}

// ─── Inventory shrink ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShrinkLine {
  pub item_id:     String,
  pub item_name:   String,
  pub expected:    f64,
  pub counted:     f64,
  pub shrink_cost: f64,
}

/// Per-line shrink for one count. Lines without a balance are ignored.
pub fn shrink_lines(
  count: &InventoryCount,
  balances: &HashMap<&str, &InventoryBalance>,
) -> Vec<ShrinkLine> {
  count
    .lines
    .iter()
    .filter_map(|l| {
      let b = balances.get(l.item_id.as_str())?;
      Some(ShrinkLine {
        item_id:     l.item_id.clone(),
        item_name:   l.item_name.clone(),
        expected:    b.expected_qty,
        counted:     l.counted_qty,
        shrink_cost: (b.expected_qty - l.counted_qty) * b.unit_cost,
      })
    })
    .collect()
}

pub fn shrink_window_start(business_date: NaiveDate, policy: &ProcurementPolicy) -> NaiveDate {
  business_date - Duration::days(policy.shrink_lookback_days - 1)
}

/// Flag approved counts in the lookback window whose positive shrink cost
/// exceeds the warning threshold.
pub fn inventory_shrink(
  business_date: NaiveDate,
  counts: &[InventoryCount],
  balances: &[InventoryBalance],
  policy: &ProcurementPolicy,
) -> Vec<Exception> {
  let start = shrink_window_start(business_date, policy);
  let by_item: HashMap<&str, &InventoryBalance> =
    balances.iter().map(|b| (b.item_id.as_str(), b)).collect();

  let mut out = Vec::new();
  for count in counts {
    if !count.approved || count.counted_on < start || count.counted_on > business_date {
      continue;
    }
    let mut lines: Vec<ShrinkLine> = shrink_lines(count, &by_item)
      .into_iter()
      .filter(|l| l.shrink_cost > 0.0)
      .collect();
    let total: f64 = lines.iter().map(|l| l.shrink_cost).sum();
    if total <= policy.shrink_warning_usd {
      continue;
    }
    lines.sort_by(|a, b| b.shrink_cost.total_cmp(&a.shrink_cost));
    lines.truncate(policy.shrink_top_n);

    let severity = if total > policy.shrink_critical_usd {
      ExceptionSeverity::Critical
    } else {
      ExceptionSeverity::Warning
    };

    out.push(Exception {
      kind: ExceptionKind::InventoryShrink,
      severity,
      source_id: format!("shrink_{}", count.count_id),
      title: format!("Inventory shrink of ${total:.2} on count {}", count.count_id),
      message: format!(
        "Count {} on {} is ${total:.2} short of the perpetual balance \
         (threshold ${:.2})",
        count.count_id, count.counted_on, policy.shrink_warning_usd
      ),
      metric_values: metrics([("shrink_cost", round2(total))]),
      diagnostic: None,
      evidence: serde_json::json!({ "count_id": count.count_id, "top_lines": lines }),
      impact: Some(ImpactEstimate {
        usd:        round2(total),
        confidence: ImpactConfidence::High,
        inputs:     serde_json::json!({ "line_count": count.lines.len() }),
      }),
      manager_id: None,
    });
  }
  out
}

// ─── Recipe cost drift ───────────────────────────────────────────────────────

/// Compare the two most recent snapshots per recipe.
///
/// The older snapshot must be at least `recipe_drift_lookback_days` before
/// `business_date`; a same-day recalculation is not drift.
pub fn recipe_drift(
  venue_id: Uuid,
  business_date: NaiveDate,
  snapshots: &[RecipeCostSnapshot],
  policy: &ProcurementPolicy,
) -> Vec<Exception> {
  let mut by_recipe: BTreeMap<&str, Vec<&RecipeCostSnapshot>> = BTreeMap::new();
  for s in snapshots.iter().filter(|s| s.snapshot_date <= business_date) {
    by_recipe.entry(&s.recipe_id).or_default().push(s);
  }

  let mut out = Vec::new();
  for (recipe_id, mut snaps) in by_recipe {
    snaps.sort_by_key(|s| s.snapshot_date);
    let [.., previous, latest] = snaps.as_slice() else { continue };
    if (business_date - previous.snapshot_date).num_days() < policy.recipe_drift_lookback_days {
      continue;
    }
    if previous.cost <= 0.0 {
      continue;
    }
    let drift_pct = (latest.cost - previous.cost) / previous.cost * 100.0;
    if drift_pct.abs() < policy.recipe_drift_warning_pct {
      continue;
    }
    let severity = if drift_pct.abs() >= policy.recipe_drift_critical_pct {
      ExceptionSeverity::Critical
    } else {
      ExceptionSeverity::Warning
    };

    out.push(Exception {
      kind: ExceptionKind::RecipeCostDrift,
      severity,
      source_id: format!("recipe_drift_{venue_id}_{recipe_id}_{business_date}"),
      title: format!("{} cost drifted {:+.1}%", latest.recipe_name, drift_pct),
      message: format!(
        "{} went from ${:.2} on {} to ${:.2} on {}",
        latest.recipe_name,
        previous.cost,
        previous.snapshot_date,
        latest.cost,
        latest.snapshot_date
      ),
      metric_values: metrics([
        ("previous_cost", previous.cost),
        ("current_cost", latest.cost),
        ("drift_pct", round2(drift_pct)),
      ]),
      diagnostic: None,
      evidence: serde_json::json!({ "previous": previous, "latest": latest }),
      impact: None,
      manager_id: None,
    });
  }
  out
}

// ─── Par levels ──────────────────────────────────────────────────────────────

/// Items below their reorder point; critical once nothing is on hand.
pub fn par_levels(
  venue_id: Uuid,
  business_date: NaiveDate,
  rows: &[ParLevel],
) -> Vec<Exception> {
  rows
    .iter()
    .filter(|r| r.on_hand < r.reorder_point)
    .map(|r| Exception {
      kind:          ExceptionKind::ParLevel,
      severity:      if r.on_hand <= 0.0 {
        ExceptionSeverity::Critical
      } else {
        ExceptionSeverity::Warning
      },
      source_id:     format!("par_{venue_id}_{}_{business_date}", r.item_id),
      title:         format!("{} below reorder point", r.item_name),
      message:       format!(
        "{} on hand is {} against a reorder point of {} (par {})",
        r.item_name, r.on_hand, r.reorder_point, r.par_level
      ),
      metric_values: metrics([
        ("on_hand", r.on_hand),
        ("reorder_point", r.reorder_point),
        ("par_level", r.par_level),
      ]),
      diagnostic:    None,
      evidence:      serde_json::json!({ "row": r }),
      impact:        None,
      manager_id:    None,
    })
    .collect()
}
