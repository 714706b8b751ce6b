//! Foundational low-level utilities shared across dbgate crates.
//!
//! Provides wall-clock helpers used by webhook freshness checks and the
//! scratch-directory reset performed once at process start.

pub mod scratch_dir;
pub mod time_utils;

pub use scratch_dir::reset_scratch_dir;
pub use time_utils::{current_unix_timestamp, is_within_skew};
