//! [`ViolationStore`] for [`SqliteStore`].

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;
use vigil_core::{
  escalation::ViolationChange,
  scoring::ScoreRecord,
  store::{NewAction, ViolationStore},
  violation::{
    Action, ActionTemplate, EventKind, ExecutionStatus, NewViolation, Severity,
    Violation, ViolationEvent, ViolationStatus, ViolationType,
  },
};

use crate::{
  Error, Result, SqliteStore,
  encode::{
    RawAction, RawEvent, RawScore, RawTemplate, RawViolation, VIOLATION_COLUMNS,
    decode_uuid, encode_confidence, encode_date, encode_dt, encode_uuid,
  },
};

/// Append one row to the event ledger. Runs inside the caller's transaction.
pub(crate) fn insert_event(
  conn: &rusqlite::Connection,
  violation_id: &str,
  kind: &str,
  detail: &str,
  recorded_at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO violation_events (event_id, violation_id, kind, detail, recorded_at)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    rusqlite::params![encode_uuid(Uuid::new_v4()), violation_id, kind, detail, recorded_at],
  )?;
  Ok(())
}

impl SqliteStore {
  async fn query_violations(
    &self,
    where_clause: &'static str,
    params: Vec<String>,
  ) -> Result<Vec<Violation>> {
    let raws: Vec<RawViolation> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {VIOLATION_COLUMNS} FROM violations WHERE {where_clause}
           ORDER BY business_date, created_at, violation_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawViolation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawViolation::into_violation).collect()
  }
}

impl ViolationStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn find_violation(&self, org_id: Uuid, source_id: String) -> Result<Option<Uuid>> {
    let org = encode_uuid(org_id);
    let id: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT violation_id FROM violations WHERE org_id = ?1 AND source_id = ?2",
              rusqlite::params![org, source_id],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    id.as_deref().map(decode_uuid).transpose()
  }

  async fn insert_violation(
    &self,
    input: NewViolation,
    at: DateTime<Utc>,
  ) -> Result<Option<Violation>> {
    let violation = Violation {
      violation_id:          Uuid::new_v4(),
      org_id:                input.org_id,
      venue_id:              input.venue_id,
      manager_id:            input.manager_id,
      policy_fingerprint:    input.policy_fingerprint(),
      source_id:             input.source_id,
      violation_type:        input.violation_type,
      severity:              input.severity,
      status:                ViolationStatus::Open,
      title:                 input.title,
      description:           input.description,
      business_date:         input.business_date,
      escalation_level:      0,
      recurrence_count:      0,
      verification_required: input.severity == Severity::Critical,
      cross_venue:           false,
      silence_penalized:     false,
      stall_penalized:       false,
      last_escalated_on:     None,
      policy_snapshot:       input.policy_snapshot,
      policy_version:        input.policy_version,
      evidence:              input.evidence,
      derived_metrics:       input.derived_metrics,
      estimated_impact_usd:  input.estimated_impact_usd,
      impact_confidence:     input.impact_confidence,
      impact_inputs:         input.impact_inputs,
      created_at:            at,
      updated_at:            at,
    };

    let v = violation.clone();
    let created = serde_json::json!({
      "source_id":          v.source_id,
      "severity":           v.severity,
      "policy_fingerprint": v.policy_fingerprint,
    })
    .to_string();

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id = encode_uuid(v.violation_id);
        let at = encode_dt(v.created_at);
        let n = tx.execute(
          "INSERT INTO violations (
             violation_id, org_id, venue_id, manager_id, source_id,
             violation_type, severity, status, title, description, business_date,
             verification_required, policy_snapshot, policy_version,
             policy_fingerprint, evidence, derived_metrics,
             estimated_impact_usd, impact_confidence, impact_inputs,
             created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)
           ON CONFLICT (org_id, source_id) DO NOTHING",
          rusqlite::params![
            id,
            encode_uuid(v.org_id),
            v.venue_id.map(encode_uuid),
            v.manager_id.map(encode_uuid),
            v.source_id,
            v.violation_type.as_ref(),
            v.severity.as_ref(),
            v.title,
            v.description,
            encode_date(v.business_date),
            v.verification_required,
            v.policy_snapshot.to_string(),
            v.policy_version,
            v.policy_fingerprint,
            v.evidence.to_string(),
            v.derived_metrics.to_string(),
            v.estimated_impact_usd,
            v.impact_confidence.map(encode_confidence),
            v.impact_inputs.as_ref().map(|j| j.to_string()),
            at,
          ],
        )?;
        if n == 1 {
          insert_event(&tx, &id, EventKind::Created.as_ref(), &created, &at)?;
        }
        tx.commit()?;
        Ok(n == 1)
      })
      .await?;

    Ok(inserted.then_some(violation))
  }

  async fn apply_change(&self, change: ViolationChange, at: DateTime<Utc>) -> Result<()> {
    let id     = encode_uuid(change.violation_id);
    let now    = encode_dt(at);
    let last   = change.last_escalated_on.map(encode_date);
    let events = change
      .events
      .into_iter()
      .map(|e| (e.kind.as_ref().to_owned(), e.detail.to_string()))
      .collect::<Vec<_>>();

    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "UPDATE violations SET
             escalation_level  = ?2,
             recurrence_count  = ?3,
             cross_venue       = ?4,
             silence_penalized = ?5,
             stall_penalized   = ?6,
             last_escalated_on = ?7,
             updated_at        = ?8
           WHERE violation_id = ?1",
          rusqlite::params![
            id,
            change.escalation_level,
            change.recurrence_count,
            change.cross_venue,
            change.silence_penalized,
            change.stall_penalized,
            last,
            now,
          ],
        )?;
        if n == 1 {
          for (kind, detail) in &events {
            insert_event(&tx, &id, kind, detail, &now)?;
          }
        }
        tx.commit()?;
        Ok(n)
      })
      .await?;

    if updated == 0 {
      return Err(Error::ViolationNotFound(change.violation_id));
    }
    Ok(())
  }

  async fn matching_templates(
    &self,
    org_id: Uuid,
    violation_type: ViolationType,
    severity: Severity,
  ) -> Result<Vec<ActionTemplate>> {
    let org  = encode_uuid(org_id);
    let kind = violation_type.as_ref().to_owned();
    let sev  = severity.as_ref().to_owned();

    let raws: Vec<RawTemplate> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT template_id, org_id, violation_type, severity, action_type,
                  message_template, target_template, enabled
           FROM action_templates
           WHERE org_id = ?1 AND violation_type = ?2 AND severity = ?3 AND enabled = 1
           ORDER BY template_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![org, kind, sev], |row| {
            Ok(RawTemplate {
              template_id:      row.get(0)?,
              org_id:           row.get(1)?,
              violation_type:   row.get(2)?,
              severity:         row.get(3)?,
              action_type:      row.get(4)?,
              message_template: row.get(5)?,
              target_template:  row.get(6)?,
              enabled:          row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTemplate::into_template).collect()
  }

  async fn insert_action(&self, input: NewAction, at: DateTime<Utc>) -> Result<Action> {
    let action = Action {
      action_id:        Uuid::new_v4(),
      org_id:           input.org_id,
      violation_id:     input.violation_id,
      template_id:      input.template_id,
      action_type:      input.action_type,
      message:          input.message,
      target:           input.target,
      execution_status: ExecutionStatus::Pending,
      created_at:       at,
    };

    let a = action.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO actions (
             action_id, org_id, violation_id, template_id, action_type,
             message, target, execution_status, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            encode_uuid(a.action_id),
            encode_uuid(a.org_id),
            encode_uuid(a.violation_id),
            encode_uuid(a.template_id),
            a.action_type,
            a.message,
            a.target,
            a.execution_status.as_ref(),
            encode_dt(a.created_at),
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(action)
  }

  async fn upsert_score(&self, record: ScoreRecord) -> Result<()> {
    let r = record;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO scores (
             org_id, entity, entity_id, as_of, risk_score, open_warning,
             open_critical, max_escalation_level, cross_venue_open, oldest_open_days
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT (org_id, entity, entity_id, as_of) DO UPDATE SET
             risk_score           = excluded.risk_score,
             open_warning         = excluded.open_warning,
             open_critical        = excluded.open_critical,
             max_escalation_level = excluded.max_escalation_level,
             cross_venue_open     = excluded.cross_venue_open,
             oldest_open_days     = excluded.oldest_open_days",
          rusqlite::params![
            encode_uuid(r.org_id),
            r.entity.as_ref(),
            encode_uuid(r.entity_id),
            encode_date(r.as_of),
            r.risk_score,
            r.open_warning,
            r.open_critical,
            r.max_escalation_level,
            r.cross_venue_open,
            r.oldest_open_days,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_violation(&self, violation_id: Uuid) -> Result<Option<Violation>> {
    let mut found = self
      .query_violations("violation_id = ?1", vec![encode_uuid(violation_id)])
      .await?;
    Ok(found.pop())
  }

  async fn list_unresolved(&self, org_id: Uuid) -> Result<Vec<Violation>> {
    self
      .query_violations(
        "org_id = ?1 AND status IN ('open', 'acknowledged', 'escalated')",
        vec![encode_uuid(org_id)],
      )
      .await
  }

  async fn list_violations_since(
    &self,
    org_id: Uuid,
    since: NaiveDate,
  ) -> Result<Vec<Violation>> {
    self
      .query_violations(
        "org_id = ?1 AND business_date >= ?2",
        vec![encode_uuid(org_id), encode_date(since)],
      )
      .await
  }

  async fn list_venue_violations(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<Violation>> {
    self
      .query_violations(
        "venue_id = ?1 AND business_date BETWEEN ?2 AND ?3",
        vec![encode_uuid(venue_id), encode_date(from), encode_date(to)],
      )
      .await
  }

  async fn list_events(&self, violation_ids: Vec<Uuid>) -> Result<Vec<ViolationEvent>> {
    if violation_ids.is_empty() {
      return Ok(Vec::new());
    }
    let ids: Vec<String> = violation_ids.into_iter().map(encode_uuid).collect();

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
          "SELECT event_id, violation_id, kind, detail, recorded_at
           FROM violation_events
           WHERE violation_id IN ({placeholders})
           ORDER BY recorded_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(ids), |row| {
            Ok(RawEvent {
              event_id:     row.get(0)?,
              violation_id: row.get(1)?,
              kind:         row.get(2)?,
              detail:       row.get(3)?,
              recorded_at:  row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn list_actions(&self, violation_id: Uuid) -> Result<Vec<Action>> {
    let vid = encode_uuid(violation_id);
    let raws: Vec<RawAction> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT action_id, org_id, violation_id, template_id, action_type,
                  message, target, execution_status, created_at
           FROM actions WHERE violation_id = ?1
           ORDER BY created_at, action_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![vid], |row| {
            Ok(RawAction {
              action_id:        row.get(0)?,
              org_id:           row.get(1)?,
              violation_id:     row.get(2)?,
              template_id:      row.get(3)?,
              action_type:      row.get(4)?,
              message:          row.get(5)?,
              target:           row.get(6)?,
              execution_status: row.get(7)?,
              created_at:       row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAction::into_action).collect()
  }

  async fn list_scores(&self, org_id: Uuid, as_of: NaiveDate) -> Result<Vec<ScoreRecord>> {
    let org = encode_uuid(org_id);
    let date = encode_date(as_of);
    let raws: Vec<RawScore> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT org_id, entity, entity_id, as_of, risk_score, open_warning,
                  open_critical, max_escalation_level, cross_venue_open, oldest_open_days
           FROM scores WHERE org_id = ?1 AND as_of = ?2
           ORDER BY entity, entity_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![org, date], |row| {
            Ok(RawScore {
              org_id:               row.get(0)?,
              entity:               row.get(1)?,
              entity_id:            row.get(2)?,
              as_of:                row.get(3)?,
              risk_score:           row.get(4)?,
              open_warning:         row.get(5)?,
              open_critical:        row.get(6)?,
              max_escalation_level: row.get(7)?,
              cross_venue_open:     row.get(8)?,
              oldest_open_days:     row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScore::into_score).collect()
  }
}
