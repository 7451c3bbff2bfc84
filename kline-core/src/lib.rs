//! kline-core
//!
//! Traits and utilities shared across the kline workspace.
//!
//! - `adapter`: the `ExchangeAdapter` trait, page requests, and time-window paging helpers.
//! - `storage`: the `Storage` and `JobStore` collaborator traits.
//! - `timeseries`: series validation (gaps, conflicts) and merge helpers.
#![warn(missing_docs)]

/// Exchange adapter trait and paging primitives.
pub mod adapter;
/// Persistence collaborators.
pub mod storage;
/// Time-series validation and merge utilities.
pub mod timeseries;

pub use adapter::{ExchangeAdapter, Page, PageRequest, TimeWindow, ensure_supported, time_window};
pub use kline_types::*;
pub use storage::{JobStore, Storage};
pub use timeseries::merge::{merge_latest, truncate_to_range};
pub use timeseries::validate::{ValidationReport, detect_gaps, validate};
