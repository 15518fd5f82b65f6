//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;
use vigil_core::{
  escalation::{EscalationCounts, ViolationChange},
  exception::ImpactConfidence,
  facts::{
    CompCheck, CostEntry, CountLine, InventoryCount, InvoiceVariance, LaborDay,
    ParLevel, VarianceSeverity,
  },
  org::{Org, Venue},
  policy::PolicyFamily,
  scoring::{ScoreRecord, ScoredEntity},
  store::{FactSource, NewAction, PolicySettings, ViolationStore},
  violation::{
    ActionTemplate, EventKind, ExecutionStatus, NewEvent, NewViolation,
    Severity, ViolationStatus, ViolationType,
  },
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn date() -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, 14).unwrap() }

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap() }

async fn seeded() -> (SqliteStore, Org, Venue) {
  let s = store().await;
  let org = Org { org_id: Uuid::new_v4(), name: "Harbor Group".into(), active: true };
  let venue = Venue {
    venue_id:        Uuid::new_v4(),
    org_id:          org.org_id,
    name:            "Pier 9".into(),
    manager_id:      Some(Uuid::new_v4()),
    pos_location_id: Some("loc-9".into()),
  };
  s.insert_org(&org).await.unwrap();
  s.insert_venue(&venue).await.unwrap();
  (s, org, venue)
}

fn new_violation(org: &Org, venue: &Venue, source_id: &str, severity: Severity) -> NewViolation {
  NewViolation {
    org_id:               org.org_id,
    venue_id:             Some(venue.venue_id),
    manager_id:           venue.manager_id,
    source_id:            source_id.into(),
    violation_type:       ViolationType::CompException,
    severity,
    title:                "Comp of $120.00 on check 1001 (Spill)".into(),
    description:          "over cap".into(),
    business_date:        date(),
    policy_snapshot:      serde_json::json!({ "family": "comp", "version": 1 }),
    policy_version:       Some(1),
    evidence:             serde_json::json!({ "check_id": "1001" }),
    derived_metrics:      serde_json::json!({ "comp_pct_of_check": 30.0 }),
    estimated_impact_usd: Some(120.0),
    impact_confidence:    Some(ImpactConfidence::High),
    impact_inputs:        Some(serde_json::json!({ "comp_total": 120.0 })),
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn inactive_orgs_are_not_listed() {
  let (s, org, venue) = seeded().await;
  let dormant = Org { org_id: Uuid::new_v4(), name: "Closed Co".into(), active: false };
  s.insert_org(&dormant).await.unwrap();

  let orgs = s.list_active_orgs().await.unwrap();
  assert_eq!(orgs, vec![org.clone()]);

  let venues = s.list_venues(org.org_id).await.unwrap();
  assert_eq!(venues, vec![venue]);
  assert!(s.list_venues(dormant.org_id).await.unwrap().is_empty());
}

// ─── Facts ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn comp_checks_for_one_day_only() {
  let (s, _, venue) = seeded().await;
  let approver = Uuid::new_v4();
  let check = CompCheck {
    check_id:      "1001".into(),
    venue_id:      venue.venue_id,
    business_date: date(),
    check_total:   400.0,
    comp_total:    120.0,
    comp_reason:   "Spill".into(),
    server_name:   Some("Dana".into()),
    approved_by:   Some(approver),
  };
  s.record_comp_check(&check).await.unwrap();
  s.record_comp_check(&CompCheck {
    check_id: "1002".into(),
    business_date: date() - Duration::days(1),
    ..check.clone()
  })
  .await
  .unwrap();

  let got = s.comp_checks(venue.venue_id, date()).await.unwrap();
  assert_eq!(got, vec![check]);
}

#[tokio::test]
async fn labor_day_missing_is_none() {
  let (s, _, venue) = seeded().await;
  assert!(s.labor_day(venue.venue_id, date()).await.unwrap().is_none());

  let day = LaborDay {
    venue_id:      venue.venue_id,
    business_date: date(),
    net_sales:     10_000.0,
    labor_cost:    3_200.0,
    labor_hours:   140.0,
    covers:        700.0,
    ot_hours:      6.0,
  };
  s.record_labor_day(&day).await.unwrap();
  assert_eq!(s.labor_day(venue.venue_id, date()).await.unwrap(), Some(day));
}

#[tokio::test]
async fn cost_entries_respect_window() {
  let (s, _, venue) = seeded().await;
  for days_ago in [0, 10, 100] {
    s.record_cost_entry(venue.venue_id, &CostEntry {
      item_id:       "salmon".into(),
      item_name:     "Salmon".into(),
      vendor_id:     None,
      business_date: date() - Duration::days(days_ago),
      unit_cost:     12.0,
    })
    .await
    .unwrap();
  }
  let got = s
    .cost_entries(venue.venue_id, date() - Duration::days(90), date())
    .await
    .unwrap();
  assert_eq!(got.len(), 2);
  assert!(got.windows(2).all(|w| w[0].business_date <= w[1].business_date));
}

#[tokio::test]
async fn resolved_invoice_variances_drop_out() {
  let (s, _, venue) = seeded().await;
  let v = InvoiceVariance {
    variance_id:  "var-1".into(),
    invoice_id:   "inv-1".into(),
    vendor_name:  Some("Sysco".into()),
    item_name:    None,
    variance_usd: 84.0,
    variance_pct: 12.0,
    severity:     VarianceSeverity::Warning,
    invoice_date: date(),
  };
  s.record_invoice_variance(venue.venue_id, &v).await.unwrap();
  assert_eq!(s.unresolved_invoice_variances(venue.venue_id).await.unwrap(), vec![v]);

  s.resolve_invoice_variance("var-1").await.unwrap();
  assert!(s.unresolved_invoice_variances(venue.venue_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn inventory_counts_come_back_with_lines() {
  let (s, _, venue) = seeded().await;
  let count = InventoryCount {
    count_id:   "cnt-1".into(),
    venue_id:   venue.venue_id,
    counted_on: date(),
    approved:   true,
    lines:      vec![
      CountLine { item_id: "a".into(), item_name: "A".into(), counted_qty: 3.0 },
      CountLine { item_id: "b".into(), item_name: "B".into(), counted_qty: 0.0 },
    ],
  };
  let empty = InventoryCount {
    count_id: "cnt-0".into(),
    counted_on: date() - Duration::days(1),
    lines: Vec::new(),
    ..count.clone()
  };
  s.record_inventory_count(&count).await.unwrap();
  s.record_inventory_count(&empty).await.unwrap();

  let got = s
    .inventory_counts(venue.venue_id, date() - Duration::days(6), date())
    .await
    .unwrap();
  assert_eq!(got, vec![empty, count]);
}

#[tokio::test]
async fn only_items_below_reorder_point_are_listed() {
  let (s, _, venue) = seeded().await;
  let low = ParLevel {
    item_id:       "lemons".into(),
    item_name:     "Lemons".into(),
    on_hand:       2.0,
    reorder_point: 10.0,
    par_level:     40.0,
  };
  let fine = ParLevel { item_id: "limes".into(), on_hand: 30.0, ..low.clone() };
  s.upsert_par_level(venue.venue_id, &low).await.unwrap();
  s.upsert_par_level(venue.venue_id, &fine).await.unwrap();

  assert_eq!(s.items_below_reorder_point(venue.venue_id).await.unwrap(), vec![low]);
}

// ─── Policy settings ─────────────────────────────────────────────────────────

#[tokio::test]
async fn policy_versions_increment_and_respect_effective_from() {
  let (s, org, _) = seeded().await;
  let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

  let v1 = s
    .save_policy(org.org_id, PolicyFamily::Comp, serde_json::json!({ "a": 1 }), t0)
    .await
    .unwrap();
  let v2 = s
    .save_policy(
      org.org_id,
      PolicyFamily::Comp,
      serde_json::json!({ "a": 2 }),
      t0 + Duration::days(10),
    )
    .await
    .unwrap();
  assert_eq!((v1.version, v2.version), (1, 2));

  let early = s
    .active_policy(org.org_id, PolicyFamily::Comp, t0 + Duration::days(1))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(early.version, 1);

  let late = s
    .active_policy(org.org_id, PolicyFamily::Comp, t0 + Duration::days(11))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(late, v2);

  assert!(
    s.active_policy(org.org_id, PolicyFamily::Labor, t0 + Duration::days(11))
      .await
      .unwrap()
      .is_none()
  );
}

// ─── Violations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_violation_sets_initial_state() {
  let (s, org, venue) = seeded().await;
  let v = s
    .insert_violation(
      new_violation(&org, &venue, "comp_1001_2024-03-14", Severity::Critical),
      t0(),
    )
    .await
    .unwrap()
    .expect("first insert");

  assert_eq!(v.status, ViolationStatus::Open);
  assert_eq!(v.escalation_level, 0);
  assert!(v.verification_required);
  assert_eq!(v.policy_fingerprint.len(), 64);

  let fetched = s.get_violation(v.violation_id).await.unwrap().unwrap();
  assert_eq!(fetched.source_id, v.source_id);
  assert_eq!(fetched.evidence, v.evidence);
  assert_eq!(fetched.impact_confidence, Some(ImpactConfidence::High));
  assert_eq!(
    s.find_violation(org.org_id, v.source_id.clone()).await.unwrap(),
    Some(v.violation_id)
  );
}

#[tokio::test]
async fn duplicate_source_id_is_a_no_op() {
  let (s, org, venue) = seeded().await;
  let input = new_violation(&org, &venue, "comp_1001_2024-03-14", Severity::Warning);
  assert!(s.insert_violation(input.clone(), t0()).await.unwrap().is_some());
  assert!(s.insert_violation(input, t0()).await.unwrap().is_none());
  assert_eq!(s.list_unresolved(org.org_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn insert_violation_records_created_event_in_the_same_write() {
  let (s, org, venue) = seeded().await;
  let v = s
    .insert_violation(
      new_violation(&org, &venue, "comp_1001_2024-03-14", Severity::Warning),
      t0(),
    )
    .await
    .unwrap()
    .unwrap();
  assert_eq!((v.created_at, v.updated_at), (t0(), t0()));

  let events = s.list_events(vec![v.violation_id]).await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].kind, EventKind::Created);
  assert_eq!(events[0].recorded_at, t0());
  assert_eq!(events[0].detail["source_id"], "comp_1001_2024-03-14");
  assert_eq!(events[0].detail["severity"], "warning");
  assert_eq!(events[0].detail["policy_fingerprint"], v.policy_fingerprint.as_str());

  // A duplicate writes neither a row nor an event.
  let again = new_violation(&org, &venue, "comp_1001_2024-03-14", Severity::Warning);
  assert!(s.insert_violation(again, t0()).await.unwrap().is_none());
  assert_eq!(s.list_events(vec![v.violation_id]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_ledger_write_leaves_no_violation_behind() {
  let (s, org, venue) = seeded().await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER ledger_offline BEFORE INSERT ON violation_events
         BEGIN SELECT RAISE(ABORT, 'ledger offline'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let input = new_violation(&org, &venue, "comp_1001_2024-03-14", Severity::Warning);
  assert!(s.insert_violation(input.clone(), t0()).await.is_err());
  assert_eq!(s.find_violation(org.org_id, input.source_id.clone()).await.unwrap(), None);

  s.conn
    .call(|conn| {
      conn.execute_batch("DROP TRIGGER ledger_offline;")?;
      Ok(())
    })
    .await
    .unwrap();

  let v = s.insert_violation(input, t0()).await.unwrap().expect("retry inserts");
  assert_eq!(s.list_events(vec![v.violation_id]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_source_id_in_another_org_is_distinct() {
  let (s, org, venue) = seeded().await;
  let other = Org { org_id: Uuid::new_v4(), name: "Other".into(), active: true };
  s.insert_org(&other).await.unwrap();

  let a = new_violation(&org, &venue, "par_x_2024-03-14", Severity::Warning);
  let b = NewViolation { org_id: other.org_id, ..a.clone() };
  assert!(s.insert_violation(a, t0()).await.unwrap().is_some());
  assert!(s.insert_violation(b, t0()).await.unwrap().is_some());
}

#[tokio::test]
async fn apply_change_updates_state_and_appends_events() {
  let (s, org, venue) = seeded().await;
  let v = s
    .insert_violation(new_violation(&org, &venue, "x_2024-03-14", Severity::Warning), t0())
    .await
    .unwrap()
    .unwrap();

  s.apply_change(ViolationChange {
    violation_id:      v.violation_id,
    escalation_level:  1,
    recurrence_count:  2,
    cross_venue:       true,
    silence_penalized: false,
    stall_penalized:   false,
    last_escalated_on: Some(date()),
    events:            vec![
      NewEvent {
        kind:   EventKind::Escalated,
        detail: serde_json::json!({ "from": 0, "to": 1 }),
      },
      NewEvent { kind: EventKind::SystemicFlagged, detail: serde_json::json!({}) },
    ],
    counts:            EscalationCounts::default(),
  }, t0() + Duration::days(1))
  .await
  .unwrap();

  let after = s.get_violation(v.violation_id).await.unwrap().unwrap();
  assert_eq!(after.escalation_level, 1);
  assert_eq!(after.recurrence_count, 2);
  assert!(after.cross_venue);
  assert_eq!(after.last_escalated_on, Some(date()));
  assert_eq!(after.status, ViolationStatus::Open);
  assert_eq!(after.title, v.title);
  assert_eq!(after.created_at, t0());
  assert_eq!(after.updated_at, t0() + Duration::days(1));

  let events = s.list_events(vec![v.violation_id]).await.unwrap();
  let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
  assert_eq!(
    kinds,
    vec![EventKind::Created, EventKind::Escalated, EventKind::SystemicFlagged]
  );
  assert!(events[1..].iter().all(|e| e.recorded_at == t0() + Duration::days(1)));
}

#[tokio::test]
async fn apply_change_to_missing_violation_errors() {
  let s = store().await;
  let err = s
    .apply_change(ViolationChange {
      violation_id:      Uuid::new_v4(),
      escalation_level:  1,
      recurrence_count:  0,
      cross_venue:       false,
      silence_penalized: false,
      stall_penalized:   false,
      last_escalated_on: None,
      events:            Vec::new(),
      counts:            EscalationCounts::default(),
    }, t0())
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::ViolationNotFound(_)));
}

#[tokio::test]
async fn transition_moves_status_out_of_unresolved() {
  let (s, org, venue) = seeded().await;
  let v = s
    .insert_violation(new_violation(&org, &venue, "y_2024-03-14", Severity::Warning), t0())
    .await
    .unwrap()
    .unwrap();

  s.transition(
    v.violation_id,
    ViolationStatus::Acknowledged,
    EventKind::Acknowledged,
    serde_json::json!({ "by": "gm" }),
    t0() + Duration::hours(1),
  )
  .await
  .unwrap();
  assert_eq!(s.list_unresolved(org.org_id).await.unwrap().len(), 1);

  s.transition(
    v.violation_id,
    ViolationStatus::Resolved,
    EventKind::Resolved,
    serde_json::json!({}),
    t0() + Duration::hours(2),
  )
  .await
  .unwrap();
  assert!(s.list_unresolved(org.org_id).await.unwrap().is_empty());
  assert_eq!(s.list_violations_since(org.org_id, date()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn templates_match_on_type_and_severity_and_enabled() {
  let (s, org, venue) = seeded().await;
  let template = ActionTemplate {
    template_id:      Uuid::new_v4(),
    org_id:           org.org_id,
    violation_type:   ViolationType::CompException,
    severity:         Severity::Warning,
    action_type:      "notify".into(),
    message_template: "{title}".into(),
    target_template:  "gm".into(),
    enabled:          true,
  };
  s.insert_action_template(&template).await.unwrap();
  s.insert_action_template(&ActionTemplate {
    template_id: Uuid::new_v4(),
    enabled: false,
    ..template.clone()
  })
  .await
  .unwrap();
  s.insert_action_template(&ActionTemplate {
    template_id: Uuid::new_v4(),
    severity: Severity::Critical,
    ..template.clone()
  })
  .await
  .unwrap();

  let got = s
    .matching_templates(org.org_id, ViolationType::CompException, Severity::Warning)
    .await
    .unwrap();
  assert_eq!(got, vec![template.clone()]);

  let v = s
    .insert_violation(new_violation(&org, &venue, "z", Severity::Warning), t0())
    .await
    .unwrap()
    .unwrap();
  let action = s
    .insert_action(NewAction {
      org_id:       org.org_id,
      violation_id: v.violation_id,
      template_id:  template.template_id,
      action_type:  "notify".into(),
      message:      "hello".into(),
      target:       "gm".into(),
    }, t0())
    .await
    .unwrap();
  assert_eq!(action.execution_status, ExecutionStatus::Pending);
  assert_eq!(action.created_at, t0());
  assert_eq!(s.list_actions(v.violation_id).await.unwrap(), vec![action]);
}

#[tokio::test]
async fn venue_violation_window_is_inclusive() {
  let (s, org, venue) = seeded().await;
  for days_ago in [0, 6, 7] {
    let mut input = new_violation(&org, &venue, &format!("w_{days_ago}"), Severity::Warning);
    input.business_date = date() - Duration::days(days_ago);
    s.insert_violation(input, t0()).await.unwrap();
  }
  let got = s
    .list_venue_violations(venue.venue_id, date() - Duration::days(6), date())
    .await
    .unwrap();
  assert_eq!(got.len(), 2);
}

// ─── Scores ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_score_replaces_same_key() {
  let (s, org, venue) = seeded().await;
  let mut record = ScoreRecord {
    org_id:               org.org_id,
    entity:               ScoredEntity::Venue,
    entity_id:            venue.venue_id,
    as_of:                date(),
    risk_score:           12.5,
    open_warning:         1,
    open_critical:        0,
    max_escalation_level: 0,
    cross_venue_open:     0,
    oldest_open_days:     3,
  };
  s.upsert_score(record.clone()).await.unwrap();
  record.risk_score = 40.0;
  s.upsert_score(record.clone()).await.unwrap();

  assert_eq!(s.list_scores(org.org_id, date()).await.unwrap(), vec![record]);
}
