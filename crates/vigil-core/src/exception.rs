//! Exceptions: ephemeral detector output.
//!
//! An exception is never persisted as-is. The violation repository turns
//! each one into a violation keyed by its `source_id`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::violation::ViolationType;

/// How serious a finding is. `Structural` sits above `Critical` and is only
/// produced by the structural-pattern check.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionSeverity {
  Warning,
  Critical,
  Structural,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::AsRefStr,
  strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum ExceptionKind {
  CompCheck,
  CompDailyPct,
  LaborPctHigh,
  SplhLow,
  CplhLow,
  OvertimeHigh,
  StructuralPattern,
  CostSpike,
  InvoiceVariance,
  InventoryShrink,
  RecipeCostDrift,
  ParLevel,
}

impl ExceptionKind {
  pub fn violation_type(self) -> ViolationType {
    match self {
      Self::CompCheck => ViolationType::CompException,
      Self::CompDailyPct => ViolationType::CompDailyPct,
      Self::LaborPctHigh => ViolationType::LaborOverage,
      Self::SplhLow | Self::CplhLow => ViolationType::StaffingGap,
      Self::OvertimeHigh => ViolationType::OvertimeExcess,
      Self::StructuralPattern => ViolationType::StructuralPattern,
      Self::CostSpike => ViolationType::CostSpike,
      Self::InvoiceVariance => ViolationType::InvoiceVariance,
      Self::InventoryShrink => ViolationType::InventoryShrink,
      Self::RecipeCostDrift => ViolationType::RecipeCostDrift,
      Self::ParLevel => ViolationType::ParLevel,
    }
  }
}

/// The SPLH/CPLH pair classified together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaborDiagnostic {
  OverstaffedSlow,
  OverstaffedBusy,
  UnderstaffedOrPacing,
  Efficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactConfidence {
  Low,
  Medium,
  High,
}

/// A dollar-impact estimate with its own provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEstimate {
  pub usd:        f64,
  pub confidence: ImpactConfidence,
  pub inputs:     serde_json::Value,
}

/// One finding from one detector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
  pub kind:          ExceptionKind,
  pub severity:      ExceptionSeverity,
  /// Deterministic idempotency key; see [`crate::violation::natural_key`].
  pub source_id:     String,
  pub title:         String,
  pub message:       String,
  pub metric_values: BTreeMap<String, f64>,
  pub diagnostic:    Option<LaborDiagnostic>,
  /// Raw inputs the finding was computed from.
  pub evidence:      serde_json::Value,
  pub impact:        Option<ImpactEstimate>,
  /// Person directly responsible, when the source records one.
  pub manager_id:    Option<Uuid>,
}

/// Round to two decimal places.
pub fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }
