// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory budget configuration and parsing.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Suffixes accepted by [`MemoryBudget::parse`], longest first.
const SUFFIXES: &[(&str, usize)] = &[
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// A hard ceiling on bytes the pool may hand out at once.
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("256M").unwrap();
/// assert_eq!(b.as_mb(), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GIB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Budget in whole megabytes.
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses `"512M"`, `"1GB"`, `"2048k"`, or a plain byte count.
    /// Case-insensitive; surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        let invalid = |reason: &str| MemoryError::InvalidBudget {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let upper = trimmed.to_uppercase();
        let (digits, multiplier) = SUFFIXES
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|(suffix, mult)| (&trimmed[..trimmed.len() - suffix.len()], *mult))
            .unwrap_or((trimmed, 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| invalid("expected a number followed by an optional K, M or G suffix"))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("value overflows usize"))?;
        if bytes == 0 {
            return Err(invalid("budget must be non-zero"));
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes {
            b if b >= GIB && b % GIB == 0 => write!(f, "{} GB", b / GIB),
            b if b >= MIB && b % MIB == 0 => write!(f, "{} MB", b / MIB),
            b if b >= KIB && b % KIB == 0 => write!(f, "{} KB", b / KIB),
            b => write!(f, "{b} B"),
        }
    }
}
