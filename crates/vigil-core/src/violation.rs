//! Violations, their append-only event ledger, and template-driven actions.
//!
//! A violation's identity is `(org_id, source_id)`. Its evidentiary fields
//! are fixed at creation; only the escalation fields change afterwards, and
//! only through the escalation engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  exception::{Exception, ExceptionSeverity, ImpactConfidence},
  org::Venue,
  policy::fingerprint,
};

// ─── Classification ──────────────────────────────────────────────────────────

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
  strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationType {
  CompException,
  CompDailyPct,
  LaborOverage,
  StaffingGap,
  OvertimeExcess,
  StructuralPattern,
  CostSpike,
  InvoiceVariance,
  InventoryShrink,
  RecipeCostDrift,
  ParLevel,
}

impl ViolationType {
  /// Types produced by the labor detector, which feed its structural check.
  pub fn is_labor(self) -> bool {
    matches!(self, Self::LaborOverage | Self::StaffingGap | Self::OvertimeExcess)
  }
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
  strum::EnumString,
  strum::AsRefStr,
  strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
  Warning,
  Critical,
}

impl From<ExceptionSeverity> for Severity {
  fn from(s: ExceptionSeverity) -> Self {
    match s {
      ExceptionSeverity::Warning => Self::Warning,
      ExceptionSeverity::Critical | ExceptionSeverity::Structural => {
        Self::Critical
      }
    }
  }
}

/// Lifecycle status. This core only ever writes `Open`; the rest are set by
/// people and downstream automation.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ViolationStatus {
  Open,
  Acknowledged,
  Escalated,
  Resolved,
  Closed,
}

impl ViolationStatus {
  pub fn is_unresolved(self) -> bool {
    matches!(self, Self::Open | Self::Acknowledged | Self::Escalated)
  }
}

// ─── Violation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
  pub violation_id:          Uuid,
  pub org_id:                Uuid,
  pub venue_id:              Option<Uuid>,
  pub manager_id:            Option<Uuid>,
  pub source_id:             String,
  pub violation_type:        ViolationType,
  pub severity:              Severity,
  pub status:                ViolationStatus,
  pub title:                 String,
  pub description:           String,
  pub business_date:         NaiveDate,

  // escalation state
  pub escalation_level:      u32,
  pub recurrence_count:      u32,
  pub verification_required: bool,
  pub cross_venue:           bool,
  pub silence_penalized:     bool,
  pub stall_penalized:       bool,
  pub last_escalated_on:     Option<NaiveDate>,

  // evidence
  pub policy_snapshot:       serde_json::Value,
  pub policy_version:        Option<i64>,
  pub policy_fingerprint:    String,
  pub evidence:              serde_json::Value,
  pub derived_metrics:       serde_json::Value,
  pub estimated_impact_usd:  Option<f64>,
  pub impact_confidence:     Option<ImpactConfidence>,
  pub impact_inputs:         Option<serde_json::Value>,

  pub created_at:            DateTime<Utc>,
  pub updated_at:            DateTime<Utc>,
}

/// Input to [`crate::store::ViolationStore::insert_violation`]. Status,
/// escalation state and timestamps are always set by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
  pub org_id:               Uuid,
  pub venue_id:             Option<Uuid>,
  pub manager_id:           Option<Uuid>,
  pub source_id:            String,
  pub violation_type:       ViolationType,
  pub severity:             Severity,
  pub title:                String,
  pub description:          String,
  pub business_date:        NaiveDate,
  pub policy_snapshot:      serde_json::Value,
  pub policy_version:       Option<i64>,
  pub evidence:             serde_json::Value,
  pub derived_metrics:      serde_json::Value,
  pub estimated_impact_usd: Option<f64>,
  pub impact_confidence:    Option<ImpactConfidence>,
  pub impact_inputs:        Option<serde_json::Value>,
}

impl NewViolation {
  /// Stamp an exception with its tenant, venue and the policy that produced
  /// it.
  pub fn from_exception(
    org_id: Uuid,
    venue: Option<&Venue>,
    business_date: NaiveDate,
    exception: Exception,
    policy_snapshot: serde_json::Value,
    policy_version: Option<i64>,
  ) -> Self {
    let derived_metrics = serde_json::json!({
      "metrics":    exception.metric_values,
      "diagnostic": exception.diagnostic,
      "exception_severity": exception.severity,
    });
    let (estimated_impact_usd, impact_confidence, impact_inputs) =
      match exception.impact {
        Some(i) => (Some(i.usd), Some(i.confidence), Some(i.inputs)),
        None => (None, None, None),
      };

    Self {
      org_id,
      venue_id: venue.map(|v| v.venue_id),
      manager_id: exception
        .manager_id
        .or_else(|| venue.and_then(|v| v.manager_id)),
      source_id: exception.source_id,
      violation_type: exception.kind.violation_type(),
      severity: exception.severity.into(),
      title: exception.title,
      description: exception.message,
      business_date,
      policy_snapshot,
      policy_version,
      evidence: exception.evidence,
      derived_metrics,
      estimated_impact_usd,
      impact_confidence,
      impact_inputs,
    }
  }

  pub fn policy_fingerprint(&self) -> String { fingerprint(&self.policy_snapshot) }
}

/// The source id with any trailing `_YYYY-MM-DD` removed. Two violations with
/// the same natural key at the same venue are the same finding on different
/// days.
pub fn natural_key(source_id: &str) -> &str {
  match source_id.rsplit_once('_') {
    Some((head, tail))
      if NaiveDate::parse_from_str(tail, "%Y-%m-%d").is_ok() =>
    {
      head
    }
    _ => source_id,
  }
}

// ─── Events ──────────────────────────────────────────────────────────────────

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
pub enum EventKind {
  Created,
  Escalated,
  RecurrenceFlagged,
  SystemicFlagged,
  SilencePenalized,
  StallPenalized,
  Acknowledged,
  Commented,
  Resolved,
  Closed,
}

impl EventKind {
  /// Whether a person (rather than this pipeline) produced the event.
  pub fn is_human_activity(self) -> bool {
    matches!(
      self,
      Self::Acknowledged | Self::Commented | Self::Resolved | Self::Closed
    )
  }
}

/// One row of the append-only violation ledger. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
  pub event_id:     Uuid,
  pub violation_id: Uuid,
  pub kind:         EventKind,
  pub detail:       serde_json::Value,
  pub recorded_at:  DateTime<Utc>,
}

/// An event to append, before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
  pub kind:   EventKind,
  pub detail: serde_json::Value,
}

// ─── Actions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTemplate {
  pub template_id:      Uuid,
  pub org_id:           Uuid,
  pub violation_type:   ViolationType,
  pub severity:         Severity,
  pub action_type:      String,
  pub message_template: String,
  pub target_template:  String,
  pub enabled:          bool,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
  pub action_id:        Uuid,
  pub org_id:           Uuid,
  pub violation_id:     Uuid,
  pub template_id:      Uuid,
  pub action_type:      String,
  pub message:          String,
  pub target:           String,
  pub execution_status: ExecutionStatus,
  pub created_at:       DateTime<Utc>,
}

/// The only values a template may reference.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
  pub title:          &'a str,
  pub severity:       Severity,
  pub violation_type: ViolationType,
}

impl<'a> TemplateVars<'a> {
  pub fn of(v: &'a Violation) -> Self {
    Self { title: &v.title, severity: v.severity, violation_type: v.violation_type }
  }
}

/// Replace `{title}`, `{severity}` and `{type}` in a single pass over the
/// template. Any other brace text is left untouched, and substituted values
/// are never scanned again.
pub fn interpolate(template: &str, vars: TemplateVars<'_>) -> String {
  let placeholders = [
    ("{title}", vars.title),
    ("{severity}", vars.severity.as_ref()),
    ("{type}", vars.violation_type.as_ref()),
  ];
  let mut out = String::with_capacity(template.len());
  let mut rest = template;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    rest = &rest[open..];
    match placeholders.iter().find(|(p, _)| rest.starts_with(p)) {
      Some((p, value)) => {
        out.push_str(value);
        rest = &rest[p.len()..];
      }
      None => {
        out.push('{');
        rest = &rest[1..];
      }
    }
  }
  out.push_str(rest);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn natural_key_strips_date_suffix() {
    assert_eq!(natural_key("comp_8812_2024-03-14"), "comp_8812");
    assert_eq!(
      natural_key("labor_v1_labor_pct_high_2024-03-14"),
      "labor_v1_labor_pct_high"
    );
  }

  #[test]
  fn natural_key_keeps_undated_ids() {
    assert_eq!(natural_key("invoice_variance_77"), "invoice_variance_77");
    assert_eq!(natural_key("shrink_2024"), "shrink_2024");
  }

  #[test]
  fn interpolation_replaces_known_placeholders_only() {
    let out = interpolate(
      "[{severity}] {type}: {title} ({unknown})",
      TemplateVars {
        title:          "Comp on check 12",
        severity:       Severity::Critical,
        violation_type: ViolationType::CompException,
      },
    );
    assert_eq!(out, "[critical] comp_exception: Comp on check 12 ({unknown})");
  }

  #[test]
  fn placeholders_inside_values_are_not_expanded() {
    let out = interpolate(
      "{title} / {severity}",
      TemplateVars {
        title:          "Comp for \"{severity} {type}\"",
        severity:       Severity::Warning,
        violation_type: ViolationType::CompException,
      },
    );
    assert_eq!(out, "Comp for \"{severity} {type}\" / warning");
    assert_eq!(
      interpolate("{{title}} {", TemplateVars {
        title:          "t",
        severity:       Severity::Warning,
        violation_type: ViolationType::ParLevel,
      }),
      "{t} {"
    );
  }

  #[test]
  fn structural_persists_as_critical() {
    assert_eq!(Severity::from(ExceptionSeverity::Structural), Severity::Critical);
    assert_eq!(Severity::from(ExceptionSeverity::Warning), Severity::Warning);
  }
}
