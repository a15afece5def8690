//! Radix prefix table over the spline points.
//!
//! An optional accelerator, after "RadixSpline: a single-pass learned
//! index" (Kipf et al.). Slot `i` holds the index of the largest spline
//! point whose key prefix (the upper bits of `key - min_key`) is at most
//! `i`, so a lookup narrows the spline binary search to the two slots
//! around the query prefix. The table tracks a shift amount; when a new
//! key no longer fits in the configured number of prefix bits, stored
//! prefixes are right-shifted and the vacated high slots reset.

use crate::common::error::{Result, TidelogError};
use crate::spline::Spline;

const UNSET: u32 = u32::MAX;

pub(crate) struct RadixTable {
    table: Vec<u32>,
    bits: u8,
    shift: u32,
    min_key: Option<u64>,
    points_seen: u32,
    prev_prefix: u64,
}

/// Bits needed to represent `x`, i.e. the smallest width whose prefix
/// shift keeps `x` inside the table.
fn bit_len(x: u64) -> u32 {
    64 - x.leading_zeros()
}

impl RadixTable {
    pub fn new(bits: u8) -> Result<Self> {
        if bits == 0 || bits > 24 {
            return Err(TidelogError::Config(format!(
                "radix table bits must be in 1..=24, got {}",
                bits
            )));
        }
        Ok(Self {
            table: vec![UNSET; 1 << bits],
            bits,
            shift: 0,
            min_key: None,
            points_seen: 0,
            prev_prefix: 0,
        })
    }

    fn size(&self) -> usize {
        self.table.len()
    }

    /// Folds the newest spline point into the table. Call right after
    /// `Spline::add`; a call that did not grow the spline is a no-op.
    pub fn add(&mut self, spline: &Spline) {
        if spline.count() <= self.points_seen as usize {
            return;
        }
        let newest = spline.count() - 1;
        let key = spline.point(newest).key;

        let min_key = *self.min_key.get_or_insert(key);
        let key_diff = key.saturating_sub(min_key);

        let bits_needed = bit_len(key_diff);
        let new_shift = bits_needed.saturating_sub(u32::from(self.bits));
        if new_shift > self.shift {
            self.rebuild(new_shift - self.shift);
            self.shift = new_shift;
        }

        let prefix = key_diff >> self.shift;
        let index = newest as u32;
        if prefix != self.prev_prefix {
            // Forward-fill skipped prefixes so lookups between two seen
            // prefixes land on the right point.
            for slot in self.prev_prefix..prefix {
                self.table[slot as usize] = index;
            }
            self.prev_prefix = prefix;
        }
        self.table[prefix as usize] = index;
        self.points_seen = spline.count() as u32;
    }

    /// Shrinks every stored prefix by `delta` bits.
    fn rebuild(&mut self, delta: u32) {
        self.prev_prefix >>= delta;
        let kept = self.size() >> delta;
        for i in 0..kept {
            self.table[i] = self.table[i << delta];
        }
        for slot in self.table.iter_mut().skip(kept) {
            *slot = UNSET;
        }
    }

    /// Bounds `(begin, end)` on the spline-point indices whose segment
    /// can contain `key`; `count` is the current spline point count.
    pub fn lookup(&self, key: u64, count: usize) -> (usize, usize) {
        debug_assert!(count > 0);
        let last = count - 1;
        let min_key = match self.min_key {
            Some(min) => min,
            None => return (0, last),
        };
        if key < min_key {
            return (0, 0);
        }
        let key_diff = key - min_key;
        let prefix = key_diff >> self.shift;
        let size = self.size() as u64;

        let mut end = if key_diff == prefix << self.shift {
            self.table_at(prefix)
        } else if prefix + 1 < size {
            self.table_at(prefix + 1)
        } else {
            self.table_at(size - 1)
        };
        if end as usize > last {
            end = last as u32;
        }

        let begin = if prefix == 0 {
            0
        } else {
            self.table_at(prefix - 1).min(end)
        };
        (begin as usize, end as usize)
    }

    fn table_at(&self, prefix: u64) -> u32 {
        if (prefix as usize) < self.size() {
            self.table[prefix as usize]
        } else {
            UNSET
        }
    }
}
