//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings and business dates `YYYY-MM-DD`, so both
//! compare correctly as text. Enums are stored as their snake_case names,
//! JSON payloads as compact JSON, UUIDs as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;
use vigil_core::{
  exception::ImpactConfidence,
  facts::VarianceSeverity,
  org::Venue,
  policy::PolicyFamily,
  scoring::{ScoreRecord, ScoredEntity},
  store::StoredPolicy,
  violation::{
    Action, ActionTemplate, EventKind, ExecutionStatus, Severity, Violation,
    ViolationEvent, ViolationStatus, ViolationType,
  },
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn decode_json(s: &str) -> Result<serde_json::Value> {
  Ok(serde_json::from_str(s)?)
}

/// Parse a strum-backed enum column.
pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownVariant { column, value: s.to_owned() })
}

// ─── Enums without strum ─────────────────────────────────────────────────────

pub fn encode_confidence(c: ImpactConfidence) -> &'static str {
  match c {
    ImpactConfidence::Low => "low",
    ImpactConfidence::Medium => "medium",
    ImpactConfidence::High => "high",
  }
}

pub fn decode_confidence(s: &str) -> Result<ImpactConfidence> {
  match s {
    "low" => Ok(ImpactConfidence::Low),
    "medium" => Ok(ImpactConfidence::Medium),
    "high" => Ok(ImpactConfidence::High),
    other => Err(Error::UnknownVariant {
      column: "impact_confidence",
      value:  other.to_owned(),
    }),
  }
}

pub fn encode_variance_severity(s: VarianceSeverity) -> &'static str {
  match s {
    VarianceSeverity::Info => "info",
    VarianceSeverity::Warning => "warning",
    VarianceSeverity::Critical => "critical",
  }
}

pub fn decode_variance_severity(s: &str) -> Result<VarianceSeverity> {
  match s {
    "info" => Ok(VarianceSeverity::Info),
    "warning" => Ok(VarianceSeverity::Warning),
    "critical" => Ok(VarianceSeverity::Critical),
    other => Err(Error::UnknownVariant {
      column: "invoice_variances.severity",
      value:  other.to_owned(),
    }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawViolation::from_row`].
pub const VIOLATION_COLUMNS: &str = "
  violation_id, org_id, venue_id, manager_id, source_id, violation_type,
  severity, status, title, description, business_date,
  escalation_level, recurrence_count, verification_required, cross_venue,
  silence_penalized, stall_penalized, last_escalated_on,
  policy_snapshot, policy_version, policy_fingerprint, evidence,
  derived_metrics, estimated_impact_usd, impact_confidence, impact_inputs,
  created_at, updated_at";

/// Raw values read directly from a `violations` row.
pub struct RawViolation {
  pub violation_id:          String,
  pub org_id:                String,
  pub venue_id:              Option<String>,
  pub manager_id:            Option<String>,
  pub source_id:             String,
  pub violation_type:        String,
  pub severity:              String,
  pub status:                String,
  pub title:                 String,
  pub description:           String,
  pub business_date:         String,
  pub escalation_level:      u32,
  pub recurrence_count:      u32,
  pub verification_required: bool,
  pub cross_venue:           bool,
  pub silence_penalized:     bool,
  pub stall_penalized:       bool,
  pub last_escalated_on:     Option<String>,
  pub policy_snapshot:       String,
  pub policy_version:        Option<i64>,
  pub policy_fingerprint:    String,
  pub evidence:              String,
  pub derived_metrics:       String,
  pub estimated_impact_usd:  Option<f64>,
  pub impact_confidence:     Option<String>,
  pub impact_inputs:         Option<String>,
  pub created_at:            String,
  pub updated_at:            String,
}

impl RawViolation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      violation_id:          row.get(0)?,
      org_id:                row.get(1)?,
      venue_id:              row.get(2)?,
      manager_id:            row.get(3)?,
      source_id:             row.get(4)?,
      violation_type:        row.get(5)?,
      severity:              row.get(6)?,
      status:                row.get(7)?,
      title:                 row.get(8)?,
      description:           row.get(9)?,
      business_date:         row.get(10)?,
      escalation_level:      row.get(11)?,
      recurrence_count:      row.get(12)?,
      verification_required: row.get(13)?,
      cross_venue:           row.get(14)?,
      silence_penalized:     row.get(15)?,
      stall_penalized:       row.get(16)?,
      last_escalated_on:     row.get(17)?,
      policy_snapshot:       row.get(18)?,
      policy_version:        row.get(19)?,
      policy_fingerprint:    row.get(20)?,
      evidence:              row.get(21)?,
      derived_metrics:       row.get(22)?,
      estimated_impact_usd:  row.get(23)?,
      impact_confidence:     row.get(24)?,
      impact_inputs:         row.get(25)?,
      created_at:            row.get(26)?,
      updated_at:            row.get(27)?,
    })
  }

  pub fn into_violation(self) -> Result<Violation> {
    Ok(Violation {
      violation_id:          decode_uuid(&self.violation_id)?,
      org_id:                decode_uuid(&self.org_id)?,
      venue_id:              decode_opt_uuid(self.venue_id)?,
      manager_id:            decode_opt_uuid(self.manager_id)?,
      source_id:             self.source_id,
      violation_type:        decode_enum::<ViolationType>(
        "violations.violation_type",
        &self.violation_type,
      )?,
      severity:              decode_enum::<Severity>("violations.severity", &self.severity)?,
      status:                decode_enum::<ViolationStatus>("violations.status", &self.status)?,
      title:                 self.title,
      description:           self.description,
      business_date:         decode_date(&self.business_date)?,
      escalation_level:      self.escalation_level,
      recurrence_count:      self.recurrence_count,
      verification_required: self.verification_required,
      cross_venue:           self.cross_venue,
      silence_penalized:     self.silence_penalized,
      stall_penalized:       self.stall_penalized,
      last_escalated_on:     self.last_escalated_on.as_deref().map(decode_date).transpose()?,
      policy_snapshot:       decode_json(&self.policy_snapshot)?,
      policy_version:        self.policy_version,
      policy_fingerprint:    self.policy_fingerprint,
      evidence:              decode_json(&self.evidence)?,
      derived_metrics:       decode_json(&self.derived_metrics)?,
      estimated_impact_usd:  self.estimated_impact_usd,
      impact_confidence:     self
        .impact_confidence
        .as_deref()
        .map(decode_confidence)
        .transpose()?,
      impact_inputs:         self.impact_inputs.as_deref().map(decode_json).transpose()?,
      created_at:            decode_dt(&self.created_at)?,
      updated_at:            decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read from a `violation_events` row.
pub struct RawEvent {
  pub event_id:     String,
  pub violation_id: String,
  pub kind:         String,
  pub detail:       String,
  pub recorded_at:  String,
}

impl RawEvent {
  pub fn into_event(self) -> Result<ViolationEvent> {
    Ok(ViolationEvent {
      event_id:     decode_uuid(&self.event_id)?,
      violation_id: decode_uuid(&self.violation_id)?,
      kind:         decode_enum::<EventKind>("violation_events.kind", &self.kind)?,
      detail:       decode_json(&self.detail)?,
      recorded_at:  decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawTemplate {
  pub template_id:      String,
  pub org_id:           String,
  pub violation_type:   String,
  pub severity:         String,
  pub action_type:      String,
  pub message_template: String,
  pub target_template:  String,
  pub enabled:          bool,
}

impl RawTemplate {
  pub fn into_template(self) -> Result<ActionTemplate> {
    Ok(ActionTemplate {
      template_id:      decode_uuid(&self.template_id)?,
      org_id:           decode_uuid(&self.org_id)?,
      violation_type:   decode_enum("action_templates.violation_type", &self.violation_type)?,
      severity:         decode_enum("action_templates.severity", &self.severity)?,
      action_type:      self.action_type,
      message_template: self.message_template,
      target_template:  self.target_template,
      enabled:          self.enabled,
    })
  }
}

pub struct RawAction {
  pub action_id:        String,
  pub org_id:           String,
  pub violation_id:     String,
  pub template_id:      String,
  pub action_type:      String,
  pub message:          String,
  pub target:           String,
  pub execution_status: String,
  pub created_at:       String,
}

impl RawAction {
  pub fn into_action(self) -> Result<Action> {
    Ok(Action {
      action_id:        decode_uuid(&self.action_id)?,
      org_id:           decode_uuid(&self.org_id)?,
      violation_id:     decode_uuid(&self.violation_id)?,
      template_id:      decode_uuid(&self.template_id)?,
      action_type:      self.action_type,
      message:          self.message,
      target:           self.target,
      execution_status: decode_enum::<ExecutionStatus>(
        "actions.execution_status",
        &self.execution_status,
      )?,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawScore {
  pub org_id:               String,
  pub entity:               String,
  pub entity_id:            String,
  pub as_of:                String,
  pub risk_score:           f64,
  pub open_warning:         u32,
  pub open_critical:        u32,
  pub max_escalation_level: u32,
  pub cross_venue_open:     u32,
  pub oldest_open_days:     i64,
}

impl RawScore {
  pub fn into_score(self) -> Result<ScoreRecord> {
    Ok(ScoreRecord {
      org_id:               decode_uuid(&self.org_id)?,
      entity:               decode_enum::<ScoredEntity>("scores.entity", &self.entity)?,
      entity_id:            decode_uuid(&self.entity_id)?,
      as_of:                decode_date(&self.as_of)?,
      risk_score:           self.risk_score,
      open_warning:         self.open_warning,
      open_critical:        self.open_critical,
      max_escalation_level: self.max_escalation_level,
      cross_venue_open:     self.cross_venue_open,
      oldest_open_days:     self.oldest_open_days,
    })
  }
}

pub struct RawVenue {
  pub venue_id:        String,
  pub org_id:          String,
  pub name:            String,
  pub manager_id:      Option<String>,
  pub pos_location_id: Option<String>,
}

impl RawVenue {
  pub fn into_venue(self) -> Result<Venue> {
    Ok(Venue {
      venue_id:        decode_uuid(&self.venue_id)?,
      org_id:          decode_uuid(&self.org_id)?,
      name:            self.name,
      manager_id:      decode_opt_uuid(self.manager_id)?,
      pos_location_id: self.pos_location_id,
    })
  }
}

pub struct RawPolicy {
  pub org_id:         String,
  pub family:         String,
  pub version:        i64,
  pub settings_json:  String,
  pub effective_from: String,
}

impl RawPolicy {
  pub fn into_stored(self) -> Result<StoredPolicy> {
    Ok(StoredPolicy {
      org_id:         decode_uuid(&self.org_id)?,
      family:         decode_enum::<PolicyFamily>("policy_settings.family", &self.family)?,
      version:        self.version,
      settings:       decode_json(&self.settings_json)?,
      effective_from: decode_dt(&self.effective_from)?,
    })
  }
}
