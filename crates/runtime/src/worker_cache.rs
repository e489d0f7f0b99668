// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-worker batching queue.
//!
//! ```text
//!   len < target - tolerance   fetch target - len from the pool
//!   len > target + tolerance   return len - target from the tail
//!   otherwise                  keep
//! ```

use crate::{ReadyInst, ReadyPool, Requester, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Rebalancing band of a [`WorkerCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheThresholds {
    pub target: usize,
    pub tolerance: usize,
}

impl Default for CacheThresholds {
    fn default() -> Self {
        Self {
            target: 16,
            tolerance: 8,
        }
    }
}

impl CacheThresholds {
    pub fn new(target: usize, tolerance: usize) -> Self {
        Self { target, tolerance }
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.target == 0 {
            return Err(RuntimeError::ConfigError(
                "cache target must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn low(&self) -> usize {
        self.target.saturating_sub(self.tolerance)
    }

    fn high(&self) -> usize {
        self.target.saturating_add(self.tolerance)
    }
}

/// What one [`WorkerCache::rebalance`] call moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rebalance {
    #[default]
    Kept,
    Fetched(usize),
    Returned(usize),
}

/// FIFO owned by one worker. Not shared.
#[derive(Debug, Default)]
pub struct WorkerCache {
    queue: VecDeque<ReadyInst>,
    thresholds: CacheThresholds,
}

impl WorkerCache {
    pub fn new(thresholds: CacheThresholds) -> Self {
        Self {
            queue: VecDeque::with_capacity(thresholds.high()),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> CacheThresholds {
        self.thresholds
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push_back(&mut self, item: ReadyInst) {
        self.queue.push_back(item);
    }

    pub fn pop_front(&mut self) -> Option<ReadyInst> {
        self.queue.pop_front()
    }

    /// Brings the cache back inside the threshold band.
    ///
    /// A short cache pulls `target - len` instructions from `pool` (fewer
    /// if the pool runs dry). An overfull cache hands its newest
    /// `len - target` instructions back so idle workers can take them.
    pub fn rebalance(&mut self, pool: &ReadyPool, requester: &Requester) -> Rebalance {
        let len = self.queue.len();
        let t = self.thresholds;
        if len < t.low() || (len == 0 && t.target > 0) {
            let got = pool.fetch(t.target - len, requester);
            let n = got.len();
            self.queue.extend(got);
            if n == 0 {
                Rebalance::Kept
            } else {
                Rebalance::Fetched(n)
            }
        } else if len > t.high() {
            let excess = self.queue.split_off(t.target);
            let n = excess.len();
            pool.push(excess);
            tracing::trace!("worker cache returned {n} instructions");
            Rebalance::Returned(n)
        } else {
            Rebalance::Kept
        }
    }

    /// Empties the cache into `pool`.
    pub fn flush(&mut self, pool: &ReadyPool) -> usize {
        let n = self.queue.len();
        if n > 0 {
            pool.push(self.queue.drain(..));
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_pool::tests::tiny_plan;

    fn filled_pool(n_plans: usize) -> (ReadyPool, usize) {
        let pool = ReadyPool::default();
        let mut total = 0;
        for _ in 0..n_plans {
            let plan = tiny_plan();
            for inst in plan.instructions().iter().filter(|i| i.layer() > 0) {
                pool.push_one(ReadyInst::new(plan.clone(), inst.index()));
                total += 1;
            }
        }
        (pool, total)
    }

    #[test]
    fn test_fetches_up_to_target() {
        let (pool, total) = filled_pool(4);
        let mut cache = WorkerCache::new(CacheThresholds::new(6, 2));
        let r = Requester::on_device(0);
        assert_eq!(cache.rebalance(&pool, &r), Rebalance::Fetched(6));
        assert_eq!(cache.len(), 6);
        // Within the band: nothing moves.
        cache.pop_front();
        assert_eq!(cache.rebalance(&pool, &r), Rebalance::Kept);
        assert_eq!(pool.len(), total - 6);
    }

    #[test]
    fn test_returns_excess_from_tail() {
        let (pool, _) = filled_pool(2);
        let mut cache = WorkerCache::new(CacheThresholds::new(4, 1));
        let mut items = pool.fetch(usize::MAX, &Requester::on_device(0));
        let head: Vec<u32> = items.iter().take(4).map(ReadyInst::index).collect();
        for item in items.drain(..) {
            cache.push_back(item);
        }
        let before = cache.len();
        assert_eq!(cache.rebalance(&pool, &Requester::on_device(0)), Rebalance::Returned(before - 4));
        let kept: Vec<u32> = std::iter::from_fn(|| cache.pop_front()).map(|r| r.index()).collect();
        assert_eq!(kept, head);
        assert_eq!(pool.len(), before - 4);
    }

    #[test]
    fn test_conserves_instructions() {
        let (pool, total) = filled_pool(3);
        let r = Requester::on_device(0);
        let mut caches: Vec<WorkerCache> = (0..3)
            .map(|i| WorkerCache::new(CacheThresholds::new(3 + i, i)))
            .collect();
        for round in 0..20 {
            for (i, cache) in caches.iter_mut().enumerate() {
                cache.rebalance(&pool, &r);
                if (round + i) % 3 == 0 {
                    // Overfill from the pool directly to force a return.
                    for item in pool.fetch(8, &r) {
                        cache.push_back(item);
                    }
                }
                let held: usize = pool.len();
                assert!(held <= total);
            }
            let in_caches: usize = caches.iter().map(WorkerCache::len).sum();
            assert_eq!(in_caches + pool.len(), total);
        }
        for cache in &mut caches {
            cache.flush(&pool);
        }
        assert_eq!(pool.len(), total);
    }

    #[test]
    fn test_empty_pool_keeps() {
        let pool = ReadyPool::default();
        let mut cache = WorkerCache::new(CacheThresholds::default());
        assert_eq!(cache.rebalance(&pool, &Requester::on_device(0)), Rebalance::Kept);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_target_rejected() {
        assert!(CacheThresholds::new(0, 4).validate().is_err());
        assert!(CacheThresholds::default().validate().is_ok());
    }
}
