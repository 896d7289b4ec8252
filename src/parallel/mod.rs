//! Parallel execution support
//!
//! Per-file parsing and per-root packet construction are independent
//! units of work; this module runs them on a rayon pool while keeping the
//! input order of the results.

mod executor;

pub use executor::{parallel_map, ParallelConfig};
