//! [`FactSource`] for [`SqliteStore`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;
use vigil_core::{
  facts::{
    CompCheck, CostEntry, CountLine, InventoryBalance, InventoryCount,
    InvoiceVariance, LaborDay, ParLevel, RecipeCostSnapshot,
  },
  org::{Org, Venue},
  store::FactSource,
};

use crate::{
  Error, Result, SqliteStore,
  encode::{
    RawVenue, decode_date, decode_opt_uuid, decode_uuid,
    decode_variance_severity, encode_date, encode_uuid,
  },
};

struct RawCheck {
  check_id:    String,
  check_total: f64,
  comp_total:  f64,
  comp_reason: String,
  server_name: Option<String>,
  approved_by: Option<String>,
}

struct RawCountRow {
  count_id:    String,
  counted_on:  String,
  approved:    bool,
  item_id:     Option<String>,
  item_name:   Option<String>,
  counted_qty: Option<f64>,
}

impl FactSource for SqliteStore {
  type Error = Error;

  // ── Directory ─────────────────────────────────────────────────────────────

  async fn list_active_orgs(&self) -> Result<Vec<Org>> {
    let raws: Vec<(String, String, bool)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT org_id, name, active FROM orgs WHERE active = 1 ORDER BY name, org_id",
        )?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, name, active)| Ok(Org { org_id: decode_uuid(&id)?, name, active }))
      .collect()
  }

  async fn list_venues(&self, org_id: Uuid) -> Result<Vec<Venue>> {
    let org = encode_uuid(org_id);
    let raws: Vec<RawVenue> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT venue_id, org_id, name, manager_id, pos_location_id
           FROM venues WHERE org_id = ?1 ORDER BY name, venue_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![org], |row| {
            Ok(RawVenue {
              venue_id:        row.get(0)?,
              org_id:          row.get(1)?,
              name:            row.get(2)?,
              manager_id:      row.get(3)?,
              pos_location_id: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVenue::into_venue).collect()
  }

  // ── Comps & labor ─────────────────────────────────────────────────────────

  async fn comp_checks(
    &self,
    venue_id: Uuid,
    business_date: NaiveDate,
  ) -> Result<Vec<CompCheck>> {
    let venue = encode_uuid(venue_id);
    let date = encode_date(business_date);
    let raws: Vec<RawCheck> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT check_id, check_total, comp_total, comp_reason, server_name, approved_by
           FROM comp_checks
           WHERE venue_id = ?1 AND business_date = ?2 AND comp_total > 0
           ORDER BY check_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue, date], |row| {
            Ok(RawCheck {
              check_id:    row.get(0)?,
              check_total: row.get(1)?,
              comp_total:  row.get(2)?,
              comp_reason: row.get(3)?,
              server_name: row.get(4)?,
              approved_by: row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|r| {
        Ok(CompCheck {
          check_id: r.check_id,
          venue_id,
          business_date,
          check_total: r.check_total,
          comp_total: r.comp_total,
          comp_reason: r.comp_reason,
          server_name: r.server_name,
          approved_by: decode_opt_uuid(r.approved_by)?,
        })
      })
      .collect()
  }

  async fn labor_day(
    &self,
    venue_id: Uuid,
    business_date: NaiveDate,
  ) -> Result<Option<LaborDay>> {
    let venue = encode_uuid(venue_id);
    let date = encode_date(business_date);
    let row = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT net_sales, labor_cost, labor_hours, covers, ot_hours
               FROM labor_days WHERE venue_id = ?1 AND business_date = ?2",
              rusqlite::params![venue, date],
              |row| {
                Ok(LaborDay {
                  venue_id,
                  business_date,
                  net_sales:   row.get(0)?,
                  labor_cost:  row.get(1)?,
                  labor_hours: row.get(2)?,
                  covers:      row.get(3)?,
                  ot_hours:    row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    Ok(row)
  }

  // ── Procurement & inventory ───────────────────────────────────────────────

  async fn cost_entries(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<CostEntry>> {
    let venue = encode_uuid(venue_id);
    let (from, to) = (encode_date(from), encode_date(to));
    let raws: Vec<(String, String, Option<String>, String, f64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_id, item_name, vendor_id, business_date, unit_cost
           FROM cost_entries
           WHERE venue_id = ?1 AND business_date BETWEEN ?2 AND ?3
           ORDER BY item_id, business_date",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue, from, to], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(item_id, item_name, vendor_id, date, unit_cost)| {
        Ok(CostEntry {
          item_id,
          item_name,
          vendor_id,
          business_date: decode_date(&date)?,
          unit_cost,
        })
      })
      .collect()
  }

  async fn unresolved_invoice_variances(
    &self,
    venue_id: Uuid,
  ) -> Result<Vec<InvoiceVariance>> {
    type Row = (
      String,
      String,
      Option<String>,
      Option<String>,
      f64,
      f64,
      String,
      String,
    );
    let venue = encode_uuid(venue_id);
    let raws: Vec<Row> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT variance_id, invoice_id, vendor_name, item_name,
                  variance_usd, variance_pct, severity, invoice_date
           FROM invoice_variances
           WHERE venue_id = ?1 AND resolved = 0
           ORDER BY invoice_date, variance_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue], |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
              row.get(5)?,
              row.get(6)?,
              row.get(7)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(variance_id, invoice_id, vendor_name, item_name, usd, pct, sev, date)| {
        Ok(InvoiceVariance {
          variance_id,
          invoice_id,
          vendor_name,
          item_name,
          variance_usd: usd,
          variance_pct: pct,
          severity: decode_variance_severity(&sev)?,
          invoice_date: decode_date(&date)?,
        })
      })
      .collect()
  }

  async fn inventory_counts(
    &self,
    venue_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<InventoryCount>> {
    let venue = encode_uuid(venue_id);
    let (from, to) = (encode_date(from), encode_date(to));
    let raws: Vec<RawCountRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT c.count_id, c.counted_on, c.approved,
                  l.item_id, l.item_name, l.counted_qty
           FROM inventory_counts c
           LEFT JOIN inventory_count_lines l ON l.count_id = c.count_id
           WHERE c.venue_id = ?1 AND c.counted_on BETWEEN ?2 AND ?3
           ORDER BY c.counted_on, c.count_id, l.item_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue, from, to], |row| {
            Ok(RawCountRow {
              count_id:    row.get(0)?,
              counted_on:  row.get(1)?,
              approved:    row.get(2)?,
              item_id:     row.get(3)?,
              item_name:   row.get(4)?,
              counted_qty: row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    // Rows arrive grouped by count; fold the join back into counts.
    let mut counts: BTreeMap<(String, String), InventoryCount> = BTreeMap::new();
    for r in raws {
      let counted_on = decode_date(&r.counted_on)?;
      let count = counts
        .entry((r.counted_on, r.count_id.clone()))
        .or_insert_with(|| InventoryCount {
          count_id: r.count_id,
          venue_id,
          counted_on,
          approved: r.approved,
          lines: Vec::new(),
        });
      if let (Some(item_id), Some(item_name), Some(counted_qty)) =
        (r.item_id, r.item_name, r.counted_qty)
      {
        count.lines.push(CountLine { item_id, item_name, counted_qty });
      }
    }
    Ok(counts.into_values().collect())
  }

  async fn inventory_balances(&self, venue_id: Uuid) -> Result<Vec<InventoryBalance>> {
    let venue = encode_uuid(venue_id);
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_id, expected_qty, unit_cost
           FROM inventory_balances WHERE venue_id = ?1 ORDER BY item_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue], |row| {
            Ok(InventoryBalance {
              item_id:      row.get(0)?,
              expected_qty: row.get(1)?,
              unit_cost:    row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  async fn recipe_cost_snapshots(
    &self,
    venue_id: Uuid,
    until: NaiveDate,
  ) -> Result<Vec<RecipeCostSnapshot>> {
    let venue = encode_uuid(venue_id);
    let until = encode_date(until);
    let raws: Vec<(String, String, String, f64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT recipe_id, recipe_name, snapshot_date, cost
           FROM recipe_cost_snapshots
           WHERE venue_id = ?1 AND snapshot_date <= ?2
           ORDER BY recipe_id, snapshot_date",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue, until], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(recipe_id, recipe_name, date, cost)| {
        Ok(RecipeCostSnapshot {
          recipe_id,
          recipe_name,
          snapshot_date: decode_date(&date)?,
          cost,
        })
      })
      .collect()
  }

  async fn items_below_reorder_point(&self, venue_id: Uuid) -> Result<Vec<ParLevel>> {
    let venue = encode_uuid(venue_id);
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_id, item_name, on_hand, reorder_point, par_level
           FROM par_levels
           WHERE venue_id = ?1 AND on_hand < reorder_point
           ORDER BY item_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![venue], |row| {
            Ok(ParLevel {
              item_id:       row.get(0)?,
              item_name:     row.get(1)?,
              on_hand:       row.get(2)?,
              reorder_point: row.get(3)?,
              par_level:     row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }
}
