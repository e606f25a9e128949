//! Branch change tracking via git2.
//!
//! Walks the commits that are on the current HEAD but not on a base branch
//! and turns each one into a `commit id -> change description` entry
//! (commit summary plus unified patch), ready to be embedded and reviewed.

pub mod tracker;

pub use tracker::{DiffTracker, TrackerOptions};
