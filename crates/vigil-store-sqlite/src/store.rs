//! [`SqliteStore`]: connection management and the ingestion side.
//!
//! The trait implementations live in sibling modules (`facts`, `policy`,
//! `violations`). The `insert_*`/`record_*` methods here are the write path
//! the POS sync and the CRUD layer use; the pipeline itself never calls
//! them.

use std::path::Path;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vigil_core::{
  facts::{
    CompCheck, CostEntry, InventoryBalance, InventoryCount, InvoiceVariance,
    LaborDay, ParLevel, RecipeCostSnapshot,
  },
  org::{Org, Venue},
  violation::{ActionTemplate, EventKind, ViolationStatus},
};

use crate::{
  Error, Result,
  encode::{encode_date, encode_dt, encode_uuid, encode_variance_severity},
  schema::SCHEMA,
  violations::insert_event,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Vigil store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Directory ───────────────────────────────────────────────────────────

  pub async fn insert_org(&self, org: &Org) -> Result<()> {
    let id = encode_uuid(org.org_id);
    let name = org.name.clone();
    let active = org.active;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO orgs (org_id, name, active) VALUES (?1, ?2, ?3)",
          rusqlite::params![id, name, active],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn insert_venue(&self, venue: &Venue) -> Result<()> {
    let venue_id   = encode_uuid(venue.venue_id);
    let org_id     = encode_uuid(venue.org_id);
    let name       = venue.name.clone();
    let manager_id = venue.manager_id.map(encode_uuid);
    let pos        = venue.pos_location_id.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO venues (venue_id, org_id, name, manager_id, pos_location_id)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![venue_id, org_id, name, manager_id, pos],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Facts ───────────────────────────────────────────────────────────────

  pub async fn record_comp_check(&self, check: &CompCheck) -> Result<()> {
    let c = check.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO comp_checks (
             venue_id, business_date, check_id, check_total, comp_total,
             comp_reason, server_name, approved_by
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            encode_uuid(c.venue_id),
            encode_date(c.business_date),
            c.check_id,
            c.check_total,
            c.comp_total,
            c.comp_reason,
            c.server_name,
            c.approved_by.map(encode_uuid),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or replace a venue's daily labor row.
  pub async fn record_labor_day(&self, day: &LaborDay) -> Result<()> {
    let d = day.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO labor_days (
             venue_id, business_date, net_sales, labor_cost, labor_hours,
             covers, ot_hours
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            encode_uuid(d.venue_id),
            encode_date(d.business_date),
            d.net_sales,
            d.labor_cost,
            d.labor_hours,
            d.covers,
            d.ot_hours,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn record_cost_entry(&self, venue_id: Uuid, entry: &CostEntry) -> Result<()> {
    let venue = encode_uuid(venue_id);
    let e = entry.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cost_entries (
             venue_id, item_id, item_name, vendor_id, business_date, unit_cost
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            venue,
            e.item_id,
            e.item_name,
            e.vendor_id,
            encode_date(e.business_date),
            e.unit_cost,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn record_invoice_variance(
    &self,
    venue_id: Uuid,
    variance: &InvoiceVariance,
  ) -> Result<()> {
    let venue = encode_uuid(venue_id);
    let v = variance.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO invoice_variances (
             variance_id, venue_id, invoice_id, vendor_name, item_name,
             variance_usd, variance_pct, severity, invoice_date
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            v.variance_id,
            venue,
            v.invoice_id,
            v.vendor_name,
            v.item_name,
            v.variance_usd,
            v.variance_pct,
            encode_variance_severity(v.severity),
            encode_date(v.invoice_date),
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Mark a variance as reconciled; it stops appearing in
  /// `unresolved_invoice_variances`.
  pub async fn resolve_invoice_variance(&self, variance_id: &str) -> Result<()> {
    let id = variance_id.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE invoice_variances SET resolved = 1 WHERE variance_id = ?1",
          rusqlite::params![id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert a count and its lines in one transaction.
  pub async fn record_inventory_count(&self, count: &InventoryCount) -> Result<()> {
    let c = count.clone();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO inventory_counts (count_id, venue_id, counted_on, approved)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            c.count_id,
            encode_uuid(c.venue_id),
            encode_date(c.counted_on),
            c.approved,
          ],
        )?;
        for line in &c.lines {
          tx.execute(
            "INSERT INTO inventory_count_lines (count_id, item_id, item_name, counted_qty)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![c.count_id, line.item_id, line.item_name, line.counted_qty],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn upsert_inventory_balance(
    &self,
    venue_id: Uuid,
    balance: &InventoryBalance,
  ) -> Result<()> {
    let venue = encode_uuid(venue_id);
    let b = balance.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO inventory_balances (venue_id, item_id, expected_qty, unit_cost)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![venue, b.item_id, b.expected_qty, b.unit_cost],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn record_recipe_snapshot(
    &self,
    venue_id: Uuid,
    snapshot: &RecipeCostSnapshot,
  ) -> Result<()> {
    let venue = encode_uuid(venue_id);
    let s = snapshot.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO recipe_cost_snapshots (
             venue_id, recipe_id, recipe_name, snapshot_date, cost
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            venue,
            s.recipe_id,
            s.recipe_name,
            encode_date(s.snapshot_date),
            s.cost,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn upsert_par_level(&self, venue_id: Uuid, row: &ParLevel) -> Result<()> {
    let venue = encode_uuid(venue_id);
    let r = row.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO par_levels (
             venue_id, item_id, item_name, on_hand, reorder_point, par_level
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            venue,
            r.item_id,
            r.item_name,
            r.on_hand,
            r.reorder_point,
            r.par_level,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Enforcement configuration & lifecycle ───────────────────────────────

  pub async fn insert_action_template(&self, template: &ActionTemplate) -> Result<()> {
    let t = template.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO action_templates (
             template_id, org_id, violation_type, severity, action_type,
             message_template, target_template, enabled
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            encode_uuid(t.template_id),
            encode_uuid(t.org_id),
            t.violation_type.as_ref(),
            t.severity.as_ref(),
            t.action_type,
            t.message_template,
            t.target_template,
            t.enabled,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Move a violation to `status` on behalf of a person and record why in
  /// the ledger, atomically.
  pub async fn transition(
    &self,
    violation_id: Uuid,
    status: ViolationStatus,
    kind: EventKind,
    detail: serde_json::Value,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let id     = encode_uuid(violation_id);
    let now    = encode_dt(at);
    let detail = detail.to_string();
    let status = status.as_ref().to_owned();
    let kind   = kind.as_ref().to_owned();

    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "UPDATE violations SET status = ?2, updated_at = ?3 WHERE violation_id = ?1",
          rusqlite::params![id, status, now],
        )?;
        if n == 1 {
          insert_event(&tx, &id, &kind, &detail, &now)?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await?;

    if updated == 0 {
      return Err(Error::ViolationNotFound(violation_id));
    }
    Ok(())
  }
}
