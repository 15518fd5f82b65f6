//! Error type for `vigil-pipeline`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The store rejected an insert as a duplicate but the row cannot be
  /// found afterwards.
  #[error("violation {source_id:?} conflicted on insert but was not found")]
  LostConflict { source_id: String },
}

impl Error {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
