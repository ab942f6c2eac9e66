//! Bounded top-k selection

use crate::types::{RowId, SimilarityResult};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Ordered by distance (total order), then rowid.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    rowid: RowId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.rowid.cmp(&other.rowid))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Keeps the `k` smallest `(distance, rowid)` pairs seen so far.
///
/// A max-heap holds the current worst survivor on top, so each new candidate
/// costs one comparison unless it displaces it.
#[derive(Debug)]
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(1024) + 1),
        }
    }

    pub(crate) fn offer(&mut self, rowid: RowId, distance: f32) {
        if self.k == 0 {
            return;
        }
        let candidate = Candidate { distance, rowid };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    /// Survivors, nearest first, ties by ascending rowid.
    pub(crate) fn into_sorted(self) -> Vec<SimilarityResult> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| SimilarityResult {
                rowid: c.rowid,
                distance: c.distance,
            })
            .collect()
    }
}
