//! Fact rows read by the detectors.
//!
//! These tables are populated by the POS sync, which lives outside this
//! workspace. Every type here is a plain value; detectors never fetch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Comps ───────────────────────────────────────────────────────────────────

/// A closed check that carried at least one comp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompCheck {
  /// POS check identifier; unique per venue and business date.
  pub check_id:      String,
  pub venue_id:      Uuid,
  pub business_date: NaiveDate,
  pub check_total:   f64,
  pub comp_total:    f64,
  pub comp_reason:   String,
  pub server_name:   Option<String>,
  /// The manager who approved the comp at the terminal, if recorded.
  pub approved_by:   Option<Uuid>,
}

// ─── Labor ───────────────────────────────────────────────────────────────────

/// One venue's daily labor aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaborDay {
  pub venue_id:      Uuid,
  pub business_date: NaiveDate,
  pub net_sales:     f64,
  pub labor_cost:    f64,
  pub labor_hours:   f64,
  pub covers:        f64,
  pub ot_hours:      f64,
}

// ─── Procurement & inventory ─────────────────────────────────────────────────

/// A unit cost observed for an item on a given day (usually from an invoice
/// line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
  pub item_id:       String,
  pub item_name:     String,
  pub vendor_id:     Option<String>,
  pub business_date: NaiveDate,
  pub unit_cost:     f64,
}

/// Severity already assigned by invoice reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceSeverity {
  Info,
  Warning,
  Critical,
}

/// An invoice-vs-order variance record that nobody has resolved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceVariance {
  pub variance_id:  String,
  pub invoice_id:   String,
  pub vendor_name:  Option<String>,
  pub item_name:    Option<String>,
  pub variance_usd: f64,
  pub variance_pct: f64,
  pub severity:     VarianceSeverity,
  pub invoice_date: NaiveDate,
}

/// One line of a physical inventory count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountLine {
  pub item_id:     String,
  pub item_name:   String,
  pub counted_qty: f64,
}

/// A physical inventory count with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCount {
  pub count_id:   String,
  pub venue_id:   Uuid,
  pub counted_on: NaiveDate,
  pub approved:   bool,
  pub lines:      Vec<CountLine>,
}

/// Perpetual inventory balance for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryBalance {
  pub item_id:      String,
  pub expected_qty: f64,
  pub unit_cost:    f64,
}

/// A point-in-time recipe (plate) cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeCostSnapshot {
  pub recipe_id:     String,
  pub recipe_name:   String,
  pub snapshot_date: NaiveDate,
  pub cost:          f64,
}

/// A row of the precomputed reorder-point view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParLevel {
  pub item_id:       String,
  pub item_name:     String,
  pub on_hand:       f64,
  pub reorder_point: f64,
  pub par_level:     f64,
}
