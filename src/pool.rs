//! Bounded worker pools.
//!
//! Every parallel operation runs inside a rayon pool built for that call, so
//! the `threads` setting of one call never leaks into another and no global
//! pool is configured.

use crate::error::{PhyloError, Result};
use rayon::ThreadPool;

/// Resolve a requested worker count: `0` means all available cores.
pub fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        threads
    }
}

/// Build a pool with `threads` workers (`0` = all available cores).
pub fn build_pool(threads: usize) -> Result<ThreadPool> {
    let n = resolve_threads(threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .build()
        .map_err(|e| PhyloError::Configuration(format!("cannot start {n} worker threads: {e}")))
}

/// Run `op` inside a fresh pool of `threads` workers.
pub fn install<T, F>(threads: usize, op: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let pool = build_pool(threads)?;
    Ok(pool.install(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn zero_means_all_cores() {
        assert!(resolve_threads(0) >= 1);
        assert_eq!(resolve_threads(3), 3);
    }

    #[test]
    fn runs_inside_bounded_pool() {
        let (workers, total) = install(2, || {
            let total: u64 = (0..100u64).into_par_iter().sum();
            (rayon::current_num_threads(), total)
        })
        .unwrap();
        assert_eq!(workers, 2);
        assert_eq!(total, 4950);
    }
}
