//! Tenant directory: orgs and their venues.
//!
//! Owned by the platform's CRUD layer; the pipeline only reads it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
  pub org_id: Uuid,
  pub name:   String,
  pub active: bool,
}

/// A single restaurant location belonging to an org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
  pub venue_id:        Uuid,
  pub org_id:          Uuid,
  pub name:            String,
  /// General manager accountable for the venue's violations.
  pub manager_id:      Option<Uuid>,
  /// POS location mapping. Venues without one are skipped by the comp
  /// detector.
  pub pos_location_id: Option<String>,
}
