//! The nightly enforcement run: detect, persist, escalate, score.
//!
//! [`Pipeline`] fans out over active tenants with per-tenant isolation and a
//! per-tenant timeout. Within a tenant the stages run strictly in order,
//! because escalation and scoring read the violation set the detectors just
//! wrote.

pub mod error;
pub mod escalation;
pub mod orchestrator;
pub mod report;
pub mod repository;
pub mod scoring;

pub use error::{Error, Result};
pub use orchestrator::{Backend, Pipeline, PipelineConfig};
pub use report::{RunReport, ScoreCounts, TenantReport};
pub use repository::{CreateOutcome, ViolationRepository};
