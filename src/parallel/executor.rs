//! Ordered parallel map over independent work items
//!
//! Uses Rayon for work-stealing parallelism with configurable limits.

use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for parallel execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Maximum number of worker threads (default: num_cpus)
    pub max_parallelism: usize,
    /// Run on the calling thread when false
    pub enabled: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            enabled: true,
        }
    }
}

impl ParallelConfig {
    /// Single-threaded configuration
    pub fn sequential() -> Self {
        Self {
            max_parallelism: 1,
            enabled: false,
        }
    }
}

/// Apply `mapper` to every item, results in input order
///
/// # Arguments
/// * `items` - Work items; each is processed independently
/// * `mapper` - Function to apply to each item (must be thread-safe)
/// * `config` - Parallel execution configuration
///
/// # Returns
/// * `Ok(Vec<R>)` - One result per item, in input order
/// * `Err(Error)` - The worker pool could not be created
///
/// Items share no mutable state, so the result is the same whether the
/// map runs on one thread or many.
pub fn parallel_map<T, R, F>(items: &[T], mapper: F, config: &ParallelConfig) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Send + Sync,
{
    // Small inputs or disabled pool - no parallelism needed
    if !config.enabled || config.max_parallelism <= 1 || items.len() <= 1 {
        return Ok(items.iter().map(&mapper).collect());
    }

    // Configure Rayon thread pool
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_parallelism.min(items.len()))
        .build()
        .map_err(|e| Error::ConfigError(format!("Failed to create thread pool: {}", e)))?;

    tracing::debug!(
        items = items.len(),
        threads = pool.current_num_threads(),
        "parallel map"
    );

    // Indexed parallel iterators collect in input order
    Ok(pool.install(|| items.par_iter().map(&mapper).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_map_basic() {
        let items = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let results = parallel_map(&items, |n| n * 2, &ParallelConfig::default()).unwrap();
        assert_eq!(results, vec![2, 4, 6, 8, 10, 12, 14, 16]);
    }

    #[test]
    fn test_parallel_map_empty() {
        let items: Vec<i32> = Vec::new();
        let results = parallel_map(&items, |n| *n, &ParallelConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let items: Vec<String> = (0..50).map(|i| format!("file{}.h", i)).collect();
        let parallel = parallel_map(
            &items,
            |s| s.len(),
            &ParallelConfig {
                max_parallelism: 4,
                enabled: true,
            },
        )
        .unwrap();
        let sequential = parallel_map(&items, |s| s.len(), &ParallelConfig::sequential()).unwrap();
        assert_eq!(parallel, sequential);
    }
}
