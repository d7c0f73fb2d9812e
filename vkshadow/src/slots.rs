// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Fixed-capacity slot arrays with a validity mask.
//!
//! Viewports, scissors and vertex buffers are all set with a `(first, count, values)` triple. A
//! [`SlotArray`] stores them by slot index and remembers which slots were ever written, so that
//! they can be written back later as a handful of contiguous runs instead of one call per slot.

use std::{fmt, iter, ops::Range};

/// A fixed array of `N` slots, each of which is either unset or holds a value.
///
/// `N` can be at most 32.
#[derive(Clone, Copy)]
pub struct SlotArray<T, const N: usize> {
    valid: u32,
    values: [T; N],
}

impl<T: Copy + Default, const N: usize> Default for SlotArray<T, N> {
    #[inline]
    fn default() -> Self {
        const { assert!(N <= 32, "a `SlotArray` can hold at most 32 slots") };

        SlotArray {
            valid: 0,
            values: [T::default(); N],
        }
    }
}

impl<T, const N: usize> SlotArray<T, N> {
    /// Returns the value in slot `index`, if it has been set.
    #[inline]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.is_set(index).then(|| &self.values[index as usize])
    }

    /// Returns whether slot `index` has been set.
    #[inline]
    pub fn is_set(&self, index: u32) -> bool {
        (index as usize) < N && self.valid & (1 << index) != 0
    }

    /// Returns the mask of set slots, bit `i` standing for slot `i`.
    #[inline]
    pub fn valid_mask(&self) -> u32 {
        self.valid
    }

    /// Returns whether no slot has been set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    /// Writes `values` to the slots starting at `first`. Slots beyond the capacity are ignored.
    pub(crate) fn write(&mut self, first: u32, values: impl IntoIterator<Item = T>) {
        for (slot, value) in (first..).zip(values) {
            if slot as usize >= N {
                break;
            }

            self.values[slot as usize] = value;
            self.valid |= 1 << slot;
        }
    }

    /// Returns every maximal run of consecutive set slots, as the first slot index of the run and
    /// the values in it, in ascending slot order.
    pub fn runs(&self) -> impl Iterator<Item = (u32, &[T])> + '_ {
        contiguous_runs(self.valid)
            .map(|run| (run.start, &self.values[run.start as usize..run.end as usize]))
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for SlotArray<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(set_bits(self.valid).map(|slot| (slot, &self.values[slot as usize])))
            .finish()
    }
}

/// Returns the maximal runs of consecutive set bits in `mask`, lowest first.
pub(crate) fn contiguous_runs(mut mask: u32) -> impl Iterator<Item = Range<u32>> {
    iter::from_fn(move || {
        if mask == 0 {
            return None;
        }

        let start = mask.trailing_zeros();
        let end = start + (mask >> start).trailing_ones();
        mask &= u32::MAX.checked_shl(end).unwrap_or(0);

        Some(start..end)
    })
}

/// Returns the indices of the set bits in `mask`, lowest first.
pub(crate) fn set_bits(mut mask: u32) -> impl Iterator<Item = u32> {
    iter::from_fn(move || {
        if mask == 0 {
            return None;
        }

        let bit = mask.trailing_zeros();
        mask &= mask - 1;

        Some(bit)
    })
}
