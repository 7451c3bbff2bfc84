//! Time-series utilities shared by the pagination driver and the orchestrator.
//!
//! - `validate`: gap detection and conflict classification
//! - `merge`: latest-wins merge and range truncation
/// Latest-wins merge helpers.
pub mod merge;
/// Gap and conflict detection.
pub mod validate;
