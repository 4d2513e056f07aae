//! Exact nearest-neighbour search over a flat, row-major vector block.
//!
//! Distance is squared Euclidean (lower is closer). Results are ordered by
//! ascending distance, ties by ascending ordinal, so rankings are stable.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Range;

use machina_core::error::{Error, Result};
use machina_core::types::Ordinal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub ordinal: Ordinal,
    pub distance: f32,
}

// Max-heap key: the worst kept candidate sits on top and is evicted first.
impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.ordinal.cmp(&other.ordinal))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatL2Index {
    /// `None` until fixed by construction or by the first insertion.
    dim: Option<usize>,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dim: usize) -> Self {
        Self { dim: Some(dim), data: Vec::new() }
    }

    /// Rebuild from a persisted block. `data.len()` must be a multiple of `dim`.
    pub(crate) fn from_raw(dim: Option<usize>, data: Vec<f32>) -> Self {
        Self { dim, data }
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        match self.dim {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn vector(&self, ordinal: Ordinal) -> Option<&[f32]> {
        let d = self.dim?;
        self.data.get(ordinal * d..(ordinal + 1) * d)
    }

    /// Check a batch without mutating anything. Returns the dimension the batch
    /// would fix the index to.
    pub fn check(&self, vectors: &[Vec<f32>]) -> Result<Option<usize>> {
        let Some(first) = vectors.first() else { return Ok(self.dim) };
        let expected = self.dim.unwrap_or(first.len());
        if expected == 0 {
            return Err(Error::InvalidVector("zero-dimensional vector".to_string()));
        }
        for v in vectors {
            if v.len() != expected {
                return Err(Error::DimensionMismatch { expected, actual: v.len() });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::InvalidVector("vector contains non-finite values".to_string()));
            }
        }
        Ok(Some(expected))
    }

    /// Append `vectors`, returning the ordinals they were assigned. Either the
    /// whole batch is appended or nothing is.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<Ordinal>> {
        let start = self.len();
        let dim = self.check(vectors)?;
        if vectors.is_empty() {
            return Ok(start..start);
        }
        self.dim = dim;
        self.data.reserve(vectors.iter().map(Vec::len).sum());
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(start..self.len())
    }

    /// The `k` nearest entries to `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.dim.unwrap_or_default();
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidVector("query contains non-finite values".to_string()));
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (ordinal, row) in self.data.chunks_exact(dim).enumerate() {
            let candidate = Neighbor { ordinal, distance: squared_l2(query, row) };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }
        Ok(heap.into_sorted_vec())
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_l2_basic() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.5, -2.0], &[1.5, -2.0]), 0.0);
    }

    #[test]
    fn heap_order_breaks_ties_by_ordinal() {
        let a = Neighbor { ordinal: 1, distance: 0.5 };
        let b = Neighbor { ordinal: 4, distance: 0.5 };
        assert!(a < b);
        assert!(Neighbor { ordinal: 9, distance: 0.1 } < a);
    }
}
