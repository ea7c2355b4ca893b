//! Metric definitions for flowlab.
//!
//! This crate centralizes metric names used by the flow engine and
//! re-exports the `metrics` facade macros. The macros are no-ops unless the
//! embedding application installs a recorder, so the engine can record
//! counters unconditionally behind its `metrics` feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use flowlab_metrics::{counter, oauth};
//!
//! counter!(oauth::FLOW_STARTS_TOTAL, "flow" => "authorization_code").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
