//! Deterministic utilities for reproducible training
//!
//! Seed derivation, split tie-breaking and a numerically stable softmax, so
//! that identical inputs and seeds yield identical models on every run.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;

/// Mix a base seed with a stream id (xxhash64 finaliser constants)
pub fn mix_seed(seed: u64, stream: u64) -> u64 {
    const PRIME1: u64 = 0x9E37_79B1_85EB_CA87;
    const PRIME2: u64 = 0xC2B2_AE3D_27D4_EB4F;
    const PRIME3: u64 = 0x1656_67B1_9E37_79F9;
    const PRIME5: u64 = 0x85EB_CA77_C2B2_AE63;

    let mut h = seed.wrapping_add(PRIME5);
    h = h.wrapping_add(stream.wrapping_mul(PRIME3));
    h = h.rotate_left(17).wrapping_mul(PRIME2);

    h ^= h >> 33;
    h = h.wrapping_mul(PRIME1);
    h ^= h >> 29;
    h = h.wrapping_mul(PRIME2);
    h ^= h >> 32;

    h
}

/// RNG for one independent stream of a seeded run
pub fn stream_rng(seed: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(mix_seed(seed, stream))
}

/// Deterministic tie-breaker for split selection
///
/// Equal-gain candidates are ordered by feature index, then threshold, then
/// default direction (left first).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub threshold: f64,
    pub default_left: bool,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold: f64, default_left: bool) -> Self {
        Self {
            feature_idx,
            threshold,
            default_left,
        }
    }

    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.feature_idx
            .cmp(&other.feature_idx)
            .then_with(|| self.threshold.total_cmp(&other.threshold))
            .then_with(|| other.default_left.cmp(&self.default_left))
    }
}

/// Numerically stable softmax
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; raw.len()];
    softmax_into(raw, &mut out);
    out
}

/// Softmax written into a caller-provided buffer of the same length
pub fn softmax_into(raw: &[f64], out: &mut [f64]) {
    if raw.is_empty() {
        return;
    }
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for (o, &v) in out.iter_mut().zip(raw) {
        let e = (v - max).exp();
        *o = e;
        sum += e;
    }
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / raw.len() as f64;
        out.iter_mut().for_each(|o| *o = uniform);
        return;
    }
    out.iter_mut().for_each(|o| *o /= sum);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_stream_rng_determinism() {
        let mut rng1 = stream_rng(42, 3);
        let mut rng2 = stream_rng(42, 3);

        for _ in 0..100 {
            assert_eq!(rng1.gen::<u64>(), rng2.gen::<u64>());
        }
    }

    #[test]
    fn test_mix_seed_separates_streams() {
        assert_ne!(mix_seed(42, 0), mix_seed(42, 1));
        assert_ne!(mix_seed(42, 0), mix_seed(43, 0));
        assert_eq!(mix_seed(7, 9), mix_seed(7, 9));
    }

    #[test]
    fn test_tie_breaker_ordering() {
        let t1 = SplitTieBreaker::new(0, 1.5, true);
        let t2 = SplitTieBreaker::new(0, 1.5, false);
        let t3 = SplitTieBreaker::new(0, 2.5, true);
        let t4 = SplitTieBreaker::new(1, 0.5, true);

        assert_eq!(t1.cmp_order(&t2), Ordering::Less);
        assert_eq!(t2.cmp_order(&t3), Ordering::Less);
        assert_eq!(t3.cmp_order(&t4), Ordering::Less);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let p = softmax(&[1000.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!(p[1] >= 0.0);
    }
}
