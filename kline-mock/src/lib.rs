//! Mock exchange adapter and in-memory collaborators.
//!
//! [`MockAdapter`] serves a deterministic synthetic series for any key and can be
//! scripted per call through a [`MockController`] to fail, hang, stall, drop bars,
//! or return revised values. [`MemoryStore`] and [`MemoryJobStore`] implement the
//! persistence traits in memory.

mod adapter;
pub mod fixtures;
mod store;

pub use adapter::{MockAdapter, MockBehavior, MockController};
pub use store::{MemoryJobStore, MemoryStore};
