//! [`PolicySettings`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;
use vigil_core::{
  policy::PolicyFamily,
  store::{PolicySettings, StoredPolicy},
};

use crate::{
  Error, Result, SqliteStore,
  encode::{RawPolicy, encode_dt, encode_uuid},
};

impl PolicySettings for SqliteStore {
  type Error = Error;

  async fn active_policy(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    as_of: DateTime<Utc>,
  ) -> Result<Option<StoredPolicy>> {
    let org = encode_uuid(org_id);
    let fam = family.as_ref().to_owned();
    let as_of = encode_dt(as_of);

    let raw: Option<RawPolicy> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT org_id, family, version, settings_json, effective_from
               FROM policy_settings
               WHERE org_id = ?1 AND family = ?2 AND effective_from <= ?3
               ORDER BY version DESC
               LIMIT 1",
              rusqlite::params![org, fam, as_of],
              |row| {
                Ok(RawPolicy {
                  org_id:         row.get(0)?,
                  family:         row.get(1)?,
                  version:        row.get(2)?,
                  settings_json:  row.get(3)?,
                  effective_from: row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPolicy::into_stored).transpose()
  }

  async fn save_policy(
    &self,
    org_id: Uuid,
    family: PolicyFamily,
    settings: serde_json::Value,
    effective_from: DateTime<Utc>,
  ) -> Result<StoredPolicy> {
    let org = encode_uuid(org_id);
    let fam = family.as_ref().to_owned();
    let json = settings.to_string();
    let from = encode_dt(effective_from);

    // Version assignment and insert share a transaction so concurrent saves
    // cannot claim the same number.
    let version: i64 = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let version: i64 = tx.query_row(
          "SELECT COALESCE(MAX(version), 0) + 1
           FROM policy_settings WHERE org_id = ?1 AND family = ?2",
          rusqlite::params![org, fam],
          |row| row.get(0),
        )?;
        tx.execute(
          "INSERT INTO policy_settings (org_id, family, version, settings_json, effective_from)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![org, fam, version, json, from],
        )?;
        tx.commit()?;
        Ok(version)
      })
      .await?;

    Ok(StoredPolicy { org_id, family, version, settings, effective_from })
  }
}
