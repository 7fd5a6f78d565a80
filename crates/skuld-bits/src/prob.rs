//! Rare-event sampling utilities.
//!
//! Noise channels with small probabilities dominate stabilizer workloads.
//! Sampling every Bernoulli trial individually costs O(n) RNG calls; sampling
//! the *gaps* between hits with a geometric distribution costs O(hits).

use rand::Rng;

/// Yields the indices of hits in a stream of Bernoulli(p) trials by sampling
/// geometric gaps between successive hits.
pub struct RareHits {
    next_candidate: u64,
    probability: f64,
}

impl RareHits {
    /// Creates an iterator over hit indices for the given hit probability.
    ///
    /// The probability must already be validated to lie in [0, 1]; that is an
    /// instruction-level concern and sampling itself never fails.
    pub fn new(probability: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&probability));
        Self {
            next_candidate: 0,
            probability,
        }
    }

    /// Returns the next hit index.
    ///
    /// With p == 0 the result is effectively infinite; callers bound their
    /// loops with an exclusive upper limit.
    pub fn next_hit<R: Rng>(&mut self, rng: &mut R) -> u64 {
        let gap = if self.probability >= 1.0 {
            0
        } else if self.probability <= 0.0 {
            u64::MAX
        } else {
            // Inverse-transform sample of Geometric(p) over {0, 1, 2, ...}.
            // 1 - U lies in (0, 1], keeping the logarithm finite.
            let u: f64 = rng.r#gen();
            ((1.0 - u).ln() / (1.0 - self.probability).ln()) as u64
        };
        let result = self.next_candidate.saturating_add(gap);
        self.next_candidate = result.saturating_add(1);
        result
    }

    /// Invokes `body` with each hit index below `num_attempts`, in order.
    pub fn for_samples<R: Rng, F: FnMut(u64)>(
        probability: f64,
        num_attempts: u64,
        rng: &mut R,
        mut body: F,
    ) {
        if probability <= 0.0 {
            return;
        }
        let mut iter = RareHits::new(probability);
        loop {
            let hit = iter.next_hit(rng);
            if hit >= num_attempts {
                return;
            }
            body(hit);
        }
    }
}

/// Collects the hit indices of `attempts` Bernoulli(p) trials.
pub fn sample_hit_indices<R: Rng>(probability: f64, attempts: u64, rng: &mut R) -> Vec<u64> {
    let mut result = vec![];
    RareHits::for_samples(probability, attempts, rng, |s| result.push(s));
    result
}

/// Fills `words` with bits that are each set with probability `probability`.
///
/// Four regimes:
/// - p > 0.5 recurses on 1-p and complements.
/// - p == 0.5 copies raw RNG words.
/// - p < 0.02 zeroes the buffer and marks hits by geometric gaps.
/// - otherwise runs a coin-flip tree over a truncated 8-bit representation
///   of p, then ORs in a sparse correction for the truncation residue.
pub fn biased_randomize_bits<R: Rng>(probability: f64, words: &mut [u64], rng: &mut R) {
    debug_assert!((0.0..=1.0).contains(&probability));
    if probability > 0.5 {
        biased_randomize_bits(1.0 - probability, words, rng);
        for w in words.iter_mut() {
            *w ^= u64::MAX;
        }
    } else if probability == 0.5 {
        for w in words.iter_mut() {
            *w = rng.r#gen();
        }
    } else if probability < 0.02 {
        words.fill(0);
        let n = (words.len() as u64) << 6;
        RareHits::for_samples(probability, n, rng, |s| {
            words[(s >> 6) as usize] |= 1u64 << (s & 63);
        });
    } else {
        // Flip up to 8 coins per position; the position of the first heads
        // selects a fractional bit of the truncated probability.
        const COIN_FLIPS: usize = 8;
        let buckets = (1u64 << COIN_FLIPS) as f64;
        let raised = probability * buckets;
        let raised_floor = raised.floor();
        let raised_leftover = raised - raised_floor;
        let p_truncated = raised_floor / buckets;
        let p_leftover = raised_leftover / buckets;
        let p_top_bits = raised_floor as u64;

        for cur in words.iter_mut() {
            let mut alive: u64 = rng.r#gen();
            let mut result: u64 = 0;
            for k_bit in (0..COIN_FLIPS - 1).rev() {
                let shoot: u64 = rng.r#gen();
                result ^= shoot & alive & ((p_top_bits >> k_bit) & 1).wrapping_neg();
                alive &= !shoot;
            }
            *cur = result;
        }

        // Absorb the probability mass lost to truncation.
        let n = (words.len() as u64) << 6;
        RareHits::for_samples(p_leftover / (1.0 - p_truncated), n, rng, |s| {
            words[(s >> 6) as usize] |= 1u64 << (s & 63);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_extremes() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_hit_indices(0.0, 100000, &mut rng), Vec::<u64>::new());
        assert_eq!(
            sample_hit_indices(1.0, 5, &mut rng),
            vec![0u64, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_hits_sorted_and_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let hits = sample_hit_indices(0.01, 10000, &mut rng);
        assert!(hits.windows(2).all(|w| w[0] < w[1]));
        assert!(hits.iter().all(|&h| h < 10000));
    }

    #[test]
    fn test_hit_rate_is_close() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 1_000_000u64;
        for &p in &[0.001, 0.01, 0.2] {
            let hits = sample_hit_indices(p, n, &mut rng).len() as f64;
            let expected = p * n as f64;
            let sigma = (n as f64 * p * (1.0 - p)).sqrt();
            assert!(
                (hits - expected).abs() < 6.0 * sigma,
                "p={p}: got {hits}, expected {expected}"
            );
        }
    }

    fn measured_bit_rate(p: f64, num_words: usize, seed: u64) -> f64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut words = vec![0u64; num_words];
        biased_randomize_bits(p, &mut words, &mut rng);
        let ones: u64 = words.iter().map(|w| u64::from(w.count_ones())).sum();
        ones as f64 / (num_words as f64 * 64.0)
    }

    #[test]
    fn test_biased_fill_rates() {
        // Covers all four regimes: sparse, coin-flip tree, exact half, complement.
        for &(p, seed) in &[(0.003, 3u64), (0.1, 4), (0.26, 5), (0.5, 6), (0.75, 7), (0.97, 8)] {
            let rate = measured_bit_rate(p, 4096, seed);
            let n = 4096.0 * 64.0;
            let sigma = (p * (1.0 - p) / n).sqrt();
            assert!(
                (rate - p).abs() < 6.0 * sigma.max(1e-4),
                "p={p}: measured {rate}"
            );
        }
    }

    #[test]
    fn test_biased_fill_boundaries() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut words = vec![u64::MAX; 8];
        biased_randomize_bits(0.0, &mut words, &mut rng);
        assert!(words.iter().all(|&w| w == 0));
        biased_randomize_bits(1.0, &mut words, &mut rng);
        assert!(words.iter().all(|&w| w == u64::MAX));
    }
}
