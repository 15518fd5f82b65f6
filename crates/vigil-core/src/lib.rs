//! Core types and trait definitions for the Vigil enforcement pipeline.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. Detectors, the escalation planner and the scorer are pure
//! functions over values defined here; storage backends implement the traits
//! in [`store`].

// Backends implement the store traits with native `async fn`.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod detect;
pub mod error;
pub mod escalation;
pub mod exception;
pub mod facts;
pub mod org;
pub mod policy;
pub mod scoring;
pub mod store;
pub mod violation;

pub use error::{Error, Result};
