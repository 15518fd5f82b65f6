//! Exception detectors.
//!
//! Every detector is a pure function of already-fetched inputs plus policy:
//! no I/O, safe to call repeatedly, and an empty input yields an empty
//! output rather than an error. Detectors do not know about each other.

pub mod comp;
pub mod labor;
pub mod procurement;
