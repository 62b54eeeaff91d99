//! Statistics
//!
//! Tracks keep a [`TrackStats`] behind their shared handle; streams assemble
//! [`StreamSummary`] snapshots on request.

pub mod metrics;

pub use metrics::{StreamSummary, TrackStats, TrackSummary};
