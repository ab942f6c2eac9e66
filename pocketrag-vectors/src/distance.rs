//! Distance functions
//!
//! Both metrics are pure functions of their inputs. Sums are accumulated in
//! `f64` in index order, so swapping the arguments gives bit-identical results.

use crate::types::Metric;

impl Metric {
    /// Distance between two equal-length vectors under this metric.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2(a, b),
            Metric::Cosine => cosine(a, b),
        }
    }
}

/// Euclidean distance.
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Defined as `1.0` when either vector has zero norm. Identical vectors give
/// exactly `0.0`.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if a == b {
        return if a.iter().all(|x| *x == 0.0) { 1.0 } else { 0.0 };
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    (1.0 - similarity).clamp(0.0, 2.0) as f32
}
