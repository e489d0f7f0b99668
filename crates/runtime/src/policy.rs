// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Queue-group selection policies for the [`ReadyPool`](crate::ReadyPool).
//!
//! | Policy | Picks |
//! |---|---|
//! | [`RoundRobin`] | next eligible group after the last pick, in insertion order |
//! | [`Priority`] | eligible group with the highest weight, earliest inserted on ties |
//! | [`Weighted`] | smooth weighted round robin: picks proportional to weight |
//!
//! A group is eligible when its weight is positive, it holds at least one
//! instruction, and its affinity admits the requester. Policies only ever
//! see eligibility through [`QueueGroup::is_eligible`].

use crate::{GroupKey, QueueGroup, Requester};
use std::collections::HashMap;

/// Chooses the queue group the next fetched instruction comes from.
///
/// Called with the pool lock held, once per fetched instruction.
pub trait SelectionPolicy: Send {
    fn name(&self) -> &str;

    /// Weight a newly created group starts with.
    fn initial_weight(&self, _key: &GroupKey) -> u32 {
        1
    }

    /// Index into `groups` of the group to pop from, or `None` if no group
    /// is eligible for `requester`.
    fn select(&mut self, groups: &[QueueGroup], requester: &Requester) -> Option<usize>;

    /// Drops any state kept for a removed group.
    fn forget(&mut self, _key: &GroupKey) {}
}

// ── Round robin ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobin {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn select(&mut self, groups: &[QueueGroup], requester: &Requester) -> Option<usize> {
        let n = groups.len();
        let start = if n == 0 { 0 } else { self.cursor % n };
        let picked = (0..n)
            .map(|i| (start + i) % n)
            .find(|&i| groups[i].is_eligible(requester))?;
        self.cursor = picked + 1;
        Some(picked)
    }
}

// ── Strict priority ────────────────────────────────────────────────

/// Highest weight first. New groups weigh `layer + 1`, so deeper layers
/// of a plan drain before shallower ones.
#[derive(Debug, Default)]
pub struct Priority;

impl SelectionPolicy for Priority {
    fn name(&self) -> &str {
        "priority"
    }

    fn initial_weight(&self, key: &GroupKey) -> u32 {
        u32::try_from(key.layer + 1).unwrap_or(u32::MAX)
    }

    fn select(&mut self, groups: &[QueueGroup], requester: &Requester) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, g) in groups.iter().enumerate() {
            if !g.is_eligible(requester) {
                continue;
            }
            if best.map_or(true, |(_, w)| g.weight() > w) {
                best = Some((i, g.weight()));
            }
        }
        best.map(|(i, _)| i)
    }
}

// ── Smooth weighted round robin ────────────────────────────────────

/// Each eligible group gains its weight in credit per pick; the richest
/// group wins and pays back the total. Over time group `g` is picked
/// `w_g / Σw` of the time, interleaved rather than in bursts.
#[derive(Debug, Default)]
pub struct Weighted {
    credit: HashMap<GroupKey, i64>,
}

impl Weighted {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for Weighted {
    fn name(&self) -> &str {
        "weighted"
    }

    fn select(&mut self, groups: &[QueueGroup], requester: &Requester) -> Option<usize> {
        let mut total = 0i64;
        let mut best: Option<(usize, i64)> = None;
        for (i, g) in groups.iter().enumerate() {
            if !g.is_eligible(requester) {
                continue;
            }
            let w = i64::from(g.weight());
            let credit = self.credit.entry(*g.key()).or_insert(0);
            *credit += w;
            total += w;
            if best.map_or(true, |(_, c)| *credit > c) {
                best = Some((i, *credit));
            }
        }
        let (picked, _) = best?;
        if let Some(credit) = self.credit.get_mut(groups[picked].key()) {
            *credit -= total;
        }
        Some(picked)
    }

    fn forget(&mut self, key: &GroupKey) {
        self.credit.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(layer: usize) -> GroupKey {
        GroupKey {
            plan: 1,
            layer,
            devices: 0,
            cores: u64::MAX,
        }
    }

    fn groups(spec: &[(usize, u32, usize)]) -> Vec<QueueGroup> {
        spec.iter()
            .map(|&(layer, weight, len)| QueueGroup::for_test(key(layer), weight, len))
            .collect()
    }

    #[test]
    fn test_round_robin_rotates() {
        let g = groups(&[(1, 1, 5), (2, 1, 5), (3, 1, 5)]);
        let mut p = RoundRobin::new();
        let r = Requester::on_device(0);
        let picks: Vec<_> = (0..4).map(|_| p.select(&g, &r).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_skips_ineligible() {
        let g = groups(&[(1, 0, 5), (2, 1, 0), (3, 1, 5)]);
        let mut p = RoundRobin::new();
        assert_eq!(p.select(&g, &Requester::on_device(0)), Some(2));
        assert_eq!(p.select(&g, &Requester::on_device(0)), Some(2));
    }

    #[test]
    fn test_priority_prefers_heaviest_then_oldest() {
        let g = groups(&[(1, 2, 5), (2, 7, 5), (3, 7, 5)]);
        assert_eq!(Priority.select(&g, &Requester::on_device(0)), Some(1));
        assert_eq!(Priority.initial_weight(&key(4)), 5);
    }

    #[test]
    fn test_weighted_proportions() {
        let g = groups(&[(1, 3, 100), (2, 1, 100)]);
        let mut p = Weighted::new();
        let mut counts = [0usize; 2];
        for _ in 0..40 {
            counts[p.select(&g, &Requester::on_device(0)).unwrap()] += 1;
        }
        assert_eq!(counts, [30, 10]);
    }

    #[test]
    fn test_nothing_eligible() {
        let g = groups(&[(1, 0, 3), (2, 4, 0)]);
        let r = Requester::on_device(0);
        assert_eq!(RoundRobin::new().select(&g, &r), None);
        assert_eq!(Priority.select(&g, &r), None);
        assert_eq!(Weighted::new().select(&g, &r), None);
        assert_eq!(RoundRobin::new().select(&[], &r), None);
    }
}
