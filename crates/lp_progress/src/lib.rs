//! Progress tracking for crawl jobs.
//!
//! The [`ProgressTracker`] owns every job aggregate in an id-keyed arena and is
//! the only place job state is mutated. Callers poll snapshots with
//! [`ProgressTracker::current`] or follow them with
//! [`ProgressTracker::subscribe`].

pub mod errors;
pub mod report;
pub mod tracker;

pub use errors::ProgressError;
pub use report::JobReport;
pub use tracker::{Begin, ProgressResult, ProgressTracker};
