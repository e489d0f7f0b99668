// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-instruction device and core restrictions.
//!
//! Affinities are written by a [`PartitionStrategy`](crate::PartitionStrategy)
//! before a run starts and only read afterwards, by the ready pool when it
//! routes instructions to queue groups and decides who may fetch them.
//!
//! ```text
//! devices: u16 bitmask   0 = any device, otherwise bit d = device d
//! cores:   u64 bitmask   bit c = core c may execute; starts all-ones
//! ```

use rand::Rng;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

/// Maximum number of compute devices (edge + servers).
pub const MAX_DEVICES: usize = 9;

/// Maximum number of worker cores a core mask can name.
pub const MAX_CORES: usize = 64;

const ALL_CORES: u64 = u64::MAX;

/// Device and core eligibility of one instruction.
pub struct Affinity {
    devices: AtomicU16,
    cores: AtomicU64,
}

impl Affinity {
    /// Unrestricted: any device, any core.
    pub fn new() -> Self {
        Self {
            devices: AtomicU16::new(0),
            cores: AtomicU64::new(ALL_CORES),
        }
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Adds `device` to the set of devices that compute this instruction.
    ///
    /// # Panics
    /// Panics if `device >= MAX_DEVICES`.
    pub fn set_compute_device(&self, device: usize) {
        assert!(device < MAX_DEVICES, "device {device} out of range ({MAX_DEVICES})");
        self.devices.fetch_or(1 << device, Ordering::Relaxed);
    }

    /// Removes every device restriction.
    pub fn clear_compute_devices(&self) {
        self.devices.store(0, Ordering::Relaxed);
    }

    /// Whether `device` may compute this instruction.
    pub fn is_device_compute(&self, device: usize) -> bool {
        let mask = self.device_mask();
        mask == 0 || (device < MAX_DEVICES && mask & (1 << device) != 0)
    }

    /// Raw device bitmask; zero means any device.
    pub fn device_mask(&self) -> u16 {
        self.devices.load(Ordering::Relaxed)
    }

    // ── Cores ──────────────────────────────────────────────────────

    pub fn allow_all_cores(&self) {
        self.cores.store(ALL_CORES, Ordering::Relaxed);
    }

    /// Leaves no core eligible until one is allowed again.
    pub fn disallow_all_cores(&self) {
        self.cores.store(0, Ordering::Relaxed);
    }

    /// Allows or disallows one core.
    pub fn allow_core(&self, core: usize, allow: bool) {
        assert!(core < MAX_CORES, "core {core} out of range ({MAX_CORES})");
        if allow {
            self.cores.fetch_or(1 << core, Ordering::Relaxed);
        } else {
            self.cores.fetch_and(!(1 << core), Ordering::Relaxed);
        }
    }

    /// Pins the instruction to one random core in `0..num_cores`.
    pub fn allow_random_core<R: Rng + ?Sized>(&self, num_cores: usize, rng: &mut R) {
        let num_cores = num_cores.clamp(1, MAX_CORES);
        self.disallow_all_cores();
        self.allow_core(rng.random_range(0..num_cores), true);
    }

    /// The lowest allowed core, or `None` if no core is allowed.
    pub fn allowed_core_index(&self) -> Option<usize> {
        let mask = self.core_mask();
        (mask != 0).then(|| mask.trailing_zeros() as usize)
    }

    pub fn is_core_compute(&self, core: usize) -> bool {
        core < MAX_CORES && self.core_mask() & (1 << core) != 0
    }

    pub fn core_mask(&self) -> u64 {
        self.cores.load(Ordering::Relaxed)
    }

    /// Copies both masks from `other`.
    pub fn copy_from(&self, other: &Affinity) {
        self.devices.store(other.device_mask(), Ordering::Relaxed);
        self.cores.store(other.core_mask(), Ordering::Relaxed);
    }

    /// Whether a worker on `device` running as `core` may execute this.
    ///
    /// A requester without a core id matches any core mask.
    pub fn admits(&self, device: usize, core: Option<usize>) -> bool {
        Self::masks_admit(self.device_mask(), self.core_mask(), device, core)
    }

    /// [`admits`](Self::admits) over a snapshot of the two masks.
    pub fn masks_admit(devices: u16, cores: u64, device: usize, core: Option<usize>) -> bool {
        let device_ok = devices == 0 || (device < MAX_DEVICES && devices & (1 << device) != 0);
        let core_ok = core.map_or(true, |c| c < MAX_CORES && cores & (1 << c) != 0);
        device_ok && core_ok
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Affinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Affinity {{ devices: {:#011b}, cores: {:#x} }}", self.device_mask(), self.core_mask())
    }
}
