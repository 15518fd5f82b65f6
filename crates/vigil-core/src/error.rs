//! Error types for `vigil-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::policy::PolicyFamily;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed {family} policy for org {org_id}: {source}")]
  PolicyDecode {
    org_id: Uuid,
    family: PolicyFamily,
    #[source]
    source: serde_json::Error,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error for transport across a trait seam.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
