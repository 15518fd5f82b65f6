//! SQLite backend for the Vigil enforcement pipeline.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. One [`SqliteStore`] implements every
//! storage trait in [`vigil_core::store`].

mod encode;
mod facts;
mod policy;
mod schema;
mod store;
mod violations;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
