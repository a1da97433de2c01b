//! Mutable views over the permuted handle array.
//!
//! Handles are positions into the forward index; the engine only ever
//! permutes a flat `u32` array, document entries never move. A range
//! couples a contiguous handle subslice with the shared forward index and
//! the gain slots; a partition is the midpoint split of a range.

use std::cmp::Ordering;

use rayon::slice::ParallelSliceMut;

use crate::TermId;
use crate::error::{Error, Result};
use crate::forward::ForwardIndex;

/// One gain slot per document position, shared across the whole recursion.
///
/// Partitions operate on disjoint handle subranges and every handle owns
/// exactly one slot, so two concurrent gain passes never touch the same
/// index, and no slot is read while another thread writes it.
pub(crate) struct GainScratch {
    slots: Box<[std::cell::UnsafeCell<f64>]>,
}

// Safety: each document belongs to exactly one live partition, so writes
// from parallel branches target disjoint slots.
unsafe impl Sync for GainScratch {}

impl GainScratch {
    pub fn new(len: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        slots.resize_with(len, || std::cell::UnsafeCell::new(0.0));
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn get(&self, handle: u32) -> f64 {
        unsafe { *self.slots[handle as usize].get() }
    }

    #[inline]
    pub fn set(&self, handle: u32, gain: f64) {
        unsafe { *self.slots[handle as usize].get() = gain }
    }
}

/// Contiguous subrange of the handle array plus the shared read-only state
/// every gain pass needs.
pub(crate) struct DocumentRange<'a> {
    docs: &'a mut [u32],
    fwd: &'a ForwardIndex,
    gains: &'a GainScratch,
}

/// A range split at its midpoint; the left half gets the floor.
pub(crate) struct DocumentPartition<'a> {
    pub left: DocumentRange<'a>,
    pub right: DocumentRange<'a>,
}

impl<'a> DocumentRange<'a> {
    pub fn new(docs: &'a mut [u32], fwd: &'a ForwardIndex, gains: &'a GainScratch) -> Self {
        Self { docs, fwd, gains }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[inline]
    pub fn term_count(&self) -> usize {
        self.fwd.term_count() as usize
    }

    #[inline]
    pub fn handles(&self) -> &[u32] {
        self.docs
    }

    #[inline]
    pub fn handle_at(&self, index: usize) -> u32 {
        self.docs[index]
    }

    #[inline]
    pub fn set_handle(&mut self, index: usize, handle: u32) {
        self.docs[index] = handle;
    }

    #[inline]
    pub fn terms(&self, handle: u32) -> &'a [TermId] {
        self.fwd.terms(handle as usize)
    }

    #[inline]
    pub fn gain(&self, handle: u32) -> f64 {
        self.gains.get(handle)
    }

    #[inline]
    pub fn set_gain(&self, handle: u32, gain: f64) {
        self.gains.set(handle, gain);
    }

    /// Split at the midpoint. No data is copied; the two halves borrow
    /// disjoint parts of the same handle slice.
    pub fn split(self) -> DocumentPartition<'a> {
        let mid = self.docs.len() / 2;
        let (left, right) = self.docs.split_at_mut(mid);
        DocumentPartition {
            left: DocumentRange::new(left, self.fwd, self.gains),
            right: DocumentRange::new(right, self.fwd, self.gains),
        }
    }

    /// Sort handles by descending gain.
    pub fn sort_by_gain(&mut self, parallel: bool) {
        let gains = self.gains;
        let by_gain = |a: &u32, b: &u32| {
            gains
                .get(*b)
                .partial_cmp(&gains.get(*a))
                .unwrap_or(Ordering::Equal)
        };
        if parallel {
            self.docs.par_sort_unstable_by(by_gain);
        } else {
            self.docs.sort_unstable_by(by_gain);
        }
    }

    /// Sort handles by ascending original document id, the reproducible
    /// base ordering inside terminal blocks.
    pub fn sort_by_id(&mut self) {
        let fwd = self.fwd;
        self.docs
            .sort_unstable_by_key(|&handle| fwd.doc_id(handle as usize));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardIndex;

    fn fixture() -> (ForwardIndex, GainScratch) {
        let fwd = ForwardIndex::from_documents(
            (0..5u32).map(|id| (id, vec![id])),
            5,
        )
        .unwrap();
        let gains = GainScratch::new(5).unwrap();
        (fwd, gains)
    }

    #[test]
    fn test_split_sizes() {
        let (fwd, gains) = fixture();

        let mut docs: Vec<u32> = (0..5).collect();
        let partition = DocumentRange::new(&mut docs, &fwd, &gains).split();
        assert_eq!(partition.left.len(), 2);
        assert_eq!(partition.right.len(), 3);
        assert_eq!(partition.left.handles(), &[0, 1]);
        assert_eq!(partition.right.handles(), &[2, 3, 4]);

        let mut even: Vec<u32> = (0..4).collect();
        let partition = DocumentRange::new(&mut even, &fwd, &gains).split();
        assert_eq!(partition.left.len(), 2);
        assert_eq!(partition.right.len(), 2);
    }

    #[test]
    fn test_sort_by_gain_descending() {
        let (fwd, gains) = fixture();
        let mut docs: Vec<u32> = (0..5).collect();
        let mut range = DocumentRange::new(&mut docs, &fwd, &gains);

        for (handle, gain) in [(0, 0.5), (1, -1.0), (2, 3.0), (3, 0.0), (4, 2.0)] {
            range.set_gain(handle, gain);
        }
        range.sort_by_gain(false);
        assert_eq!(range.handles(), &[2, 4, 0, 3, 1]);
    }

    #[test]
    fn test_sort_by_id_uses_original_ids() {
        let fwd = ForwardIndex::from_documents(
            [(3u32, vec![]), (1, vec![]), (2, vec![]), (0, vec![])],
            1,
        )
        .unwrap();
        let gains = GainScratch::new(4).unwrap();
        let mut docs: Vec<u32> = (0..4).collect();
        let mut range = DocumentRange::new(&mut docs, &fwd, &gains);

        range.sort_by_id();
        // Handle order now follows ids 0, 1, 2, 3.
        assert_eq!(range.handles(), &[3, 1, 2, 0]);
    }
}
