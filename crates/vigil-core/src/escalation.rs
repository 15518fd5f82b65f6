//! The escalation state machine, as a pure planner.
//!
//! [`plan`] reads a tenant's unresolved violations, its recent violations of
//! any status, and the event ledger, and returns the changes to write. The
//! rules are evaluated independently and each change carries the tally of
//! the rules that fired for it. Every rule is guarded by stored state
//! (`last_escalated_on`, the penalty flags, the stored recurrence count), so
//! planning twice against the applied result of the first plan yields
//! nothing new.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  ops::AddAssign,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  policy::EscalationPolicy,
  violation::{
    EventKind, NewEvent, Violation, ViolationEvent, ViolationStatus,
    ViolationType, natural_key,
  },
};

/// Per-rule tallies for one tenant run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationCounts {
  pub time_escalated:     usize,
  pub recurrence_flagged: usize,
  pub systemic_flagged:   usize,
  pub silence_penalized:  usize,
  pub stall_penalized:    usize,
}

impl EscalationCounts {
  pub fn total(&self) -> usize {
    self.time_escalated
      + self.recurrence_flagged
      + self.systemic_flagged
      + self.silence_penalized
      + self.stall_penalized
  }
}

impl AddAssign for EscalationCounts {
  fn add_assign(&mut self, rhs: Self) {
    self.time_escalated += rhs.time_escalated;
    self.recurrence_flagged += rhs.recurrence_flagged;
    self.systemic_flagged += rhs.systemic_flagged;
    self.silence_penalized += rhs.silence_penalized;
    self.stall_penalized += rhs.stall_penalized;
  }
}

/// The new escalation state of one violation plus the ledger rows
/// explaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationChange {
  pub violation_id:      Uuid,
  pub escalation_level:  u32,
  pub recurrence_count:  u32,
  pub cross_venue:       bool,
  pub silence_penalized: bool,
  pub stall_penalized:   bool,
  pub last_escalated_on: Option<NaiveDate>,
  pub events:            Vec<NewEvent>,
  /// The rules that fired for this violation.
  pub counts:            EscalationCounts,
}

impl ViolationChange {
  fn from_current(v: &Violation) -> Self {
    Self {
      violation_id:      v.violation_id,
      escalation_level:  v.escalation_level,
      recurrence_count:  v.recurrence_count,
      cross_venue:       v.cross_venue,
      silence_penalized: v.silence_penalized,
      stall_penalized:   v.stall_penalized,
      last_escalated_on: v.last_escalated_on,
      events:            Vec::new(),
      counts:            EscalationCounts::default(),
    }
  }

  fn bump(&mut self, max_level: u32, reason: &str) {
    let from = self.escalation_level;
    let to = (from + 1).min(max_level);
    if to != from {
      self.escalation_level = to;
      self.events.push(NewEvent {
        kind:   EventKind::Escalated,
        detail: serde_json::json!({ "from": from, "to": to, "reason": reason }),
      });
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationPlan {
  /// One entry per violation with at least one rule firing.
  pub changes: Vec<ViolationChange>,
}

pub struct EscalationInput<'a> {
  /// Open, acknowledged or escalated violations of the tenant.
  pub unresolved:    &'a [Violation],
  /// The tenant's violations of any status inside the longest lookback.
  pub recent:        &'a [Violation],
  /// Ledger rows for `unresolved`, any order.
  pub events:        &'a [ViolationEvent],
  pub business_date: NaiveDate,
  pub now:           DateTime<Utc>,
  pub policy:        &'a EscalationPolicy,
}

/// Earliest business date a lookback of `days` (inclusive of today) covers.
pub fn window_start(business_date: NaiveDate, days: i64) -> NaiveDate {
  business_date - Duration::days(days.max(1) - 1)
}

pub fn plan(input: EscalationInput<'_>) -> EscalationPlan {
  let p = input.policy;
  let date = input.business_date;

  let mut ledger: HashMap<Uuid, Vec<&ViolationEvent>> = HashMap::new();
  for e in input.events {
    ledger.entry(e.violation_id).or_default().push(e);
  }

  let mut changes: BTreeMap<Uuid, ViolationChange> = input
    .unresolved
    .iter()
    .filter(|v| v.status.is_unresolved())
    .map(|v| (v.violation_id, ViolationChange::from_current(v)))
    .collect();

  // ── Recurrence ──────────────────────────────────────────────────────────
  let recurrence_start = window_start(date, p.recurrence_lookback_days);
  let mut groups: HashMap<(Option<Uuid>, &str), Vec<&Violation>> = HashMap::new();
  for v in input.recent.iter().filter(|v| v.business_date >= recurrence_start) {
    groups
      .entry((v.venue_id, natural_key(&v.source_id)))
      .or_default()
      .push(v);
  }
  for group in groups.values() {
    let Some(latest) = group
      .iter()
      .max_by_key(|v| (v.business_date, v.created_at))
    else {
      continue;
    };
    let seen = (group.len() - 1) as u32;
    if let Some(c) = changes.get_mut(&latest.violation_id)
      && seen > c.recurrence_count
    {
      c.recurrence_count = seen;
      c.events.push(NewEvent {
        kind:   EventKind::RecurrenceFlagged,
        detail: serde_json::json!({
          "recurrence_count": seen,
          "natural_key":      natural_key(&latest.source_id),
        }),
      });
      c.counts.recurrence_flagged += 1;
    }
  }

  // ── Systemic / cross-venue ──────────────────────────────────────────────
  let systemic_start = window_start(date, p.systemic_window_days);
  let mut by_type: HashMap<ViolationType, (BTreeSet<Uuid>, usize)> = HashMap::new();
  for v in input.recent.iter().filter(|v| v.business_date >= systemic_start) {
    let entry = by_type.entry(v.violation_type).or_default();
    if let Some(venue) = v.venue_id {
      entry.0.insert(venue);
    }
    entry.1 += 1;
  }
  for v in input.unresolved {
    if v.business_date < systemic_start {
      continue;
    }
    let Some((venues, total)) = by_type.get(&v.violation_type) else {
      continue;
    };
    if venues.len() < p.systemic_min_venues || *total < p.systemic_min_count {
      continue;
    }
    if let Some(c) = changes.get_mut(&v.violation_id)
      && !c.cross_venue
    {
      c.cross_venue = true;
      c.events.push(NewEvent {
        kind:   EventKind::SystemicFlagged,
        detail: serde_json::json!({
          "violation_type": v.violation_type,
          "venues":         venues.len(),
          "instances":      total,
        }),
      });
      c.counts.systemic_flagged += 1;
    }
  }

  // ── Time, silence, stall ────────────────────────────────────────────────
  for v in input.unresolved {
    let Some(c) = changes.get_mut(&v.violation_id) else { continue };
    let events = ledger.get(&v.violation_id).map(Vec::as_slice).unwrap_or(&[]);

    let since = v.last_escalated_on.unwrap_or(v.business_date);
    if (date - since).num_days() >= p.escalate_after_days
      && c.last_escalated_on != Some(date)
      && c.escalation_level < p.max_level
    {
      c.bump(p.max_level, "time");
      c.last_escalated_on = Some(date);
      c.counts.time_escalated += 1;
    }

    let silent = !events.iter().any(|e| e.kind.is_human_activity());
    if v.status == ViolationStatus::Open
      && silent
      && !c.silence_penalized
      && input.now - v.created_at >= Duration::hours(p.silence_grace_hours)
    {
      c.silence_penalized = true;
      c.bump(p.max_level, "silence");
      c.events.push(NewEvent {
        kind:   EventKind::SilencePenalized,
        detail: serde_json::json!({ "grace_hours": p.silence_grace_hours }),
      });
      c.counts.silence_penalized += 1;
    }

    if v.status == ViolationStatus::Acknowledged && !c.stall_penalized {
      let acknowledged_at = events
        .iter()
        .filter(|e| e.kind == EventKind::Acknowledged)
        .map(|e| e.recorded_at)
        .max()
        .unwrap_or(v.updated_at);
      if input.now - acknowledged_at >= Duration::hours(p.stall_sla_hours) {
        c.stall_penalized = true;
        c.bump(p.max_level, "stall");
        c.events.push(NewEvent {
          kind:   EventKind::StallPenalized,
          detail: serde_json::json!({
            "acknowledged_at": acknowledged_at,
            "sla_hours":       p.stall_sla_hours,
          }),
        });
        c.counts.stall_penalized += 1;
      }
    }
  }

  EscalationPlan {
    changes: changes.into_values().filter(|c| !c.events.is_empty()).collect(),
  }
}
