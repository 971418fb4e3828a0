//! Per-worker scratch buffers
//!
//! Pairwise forces write to both particles of a pair, so workers cannot
//! share the output array. Each partition of the particle range gets its own
//! full-length buffer from this pool; after the parallel sweep the buffers
//! are summed serially into the output.
//!
//! The pool is owned by the solver and sized once to its worker count;
//! partition `k` always uses buffer `k`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use super::states::NVec3;

#[derive(Debug)]
pub struct ScratchPool {
    buffers: Vec<Mutex<Vec<NVec3>>>,
}

impl ScratchPool {
    /// Pool with `workers` buffers (at least one)
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            buffers: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// One buffer per rayon worker in the current pool
    pub fn for_current_threads() -> Self {
        Self::new(rayon::current_num_threads())
    }

    pub fn workers(&self) -> usize {
        self.buffers.len()
    }

    /// Run `kernel(range, scratch)` over `n` particles split into one
    /// contiguous range per worker, then add every scratch buffer into `out`.
    ///
    /// `kernel` may write to any index of its scratch buffer.
    pub fn accumulate<F>(&self, n: usize, out: &mut [NVec3], kernel: F)
    where
        F: Fn(std::ops::Range<usize>, &mut [NVec3]) + Sync,
    {
        debug_assert!(out.len() >= n);
        if n == 0 {
            return;
        }
        let parts = self.workers().min(n);
        let chunk = n.div_ceil(parts);

        self.buffers[..parts]
            .par_iter()
            .enumerate()
            .for_each(|(k, buffer)| {
                let mut scratch = lock(buffer);
                scratch.clear();
                scratch.resize(n, NVec3::zeros());
                let start = k * chunk;
                let end = ((k + 1) * chunk).min(n);
                if start < end {
                    kernel(start..end, &mut scratch);
                }
            });

        // serial merge, fixed order so results do not depend on scheduling
        for buffer in &self.buffers[..parts] {
            let scratch = lock(buffer);
            for (o, s) in out.iter_mut().zip(scratch.iter()) {
                *o += s;
            }
        }
    }
}

fn lock(buffer: &Mutex<Vec<NVec3>>) -> MutexGuard<'_, Vec<NVec3>> {
    // a panicking worker leaves a buffer that is cleared on next use anyway
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}
