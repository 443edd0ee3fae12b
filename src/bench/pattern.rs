//! Randomized access pattern generation for the latency experiment.
//!
//! The latency kernel loads from addresses the host picks at random. The
//! hardware cannot address below its burst granularity, so every drawn
//! index is rounded down to the nearest multiple of the alignment stride
//! before it is handed to the device. Rounding down cannot leave the
//! domain: index 0 is already aligned.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform index generator with burst-granularity rounding.
///
/// Seedable so a run's pattern is reproducible in tests; the host programs
/// seed from entropy because the benchmark itself does not need cross-run
/// reproducibility.
pub struct AccessPatternGenerator {
    rng: StdRng,
}

impl AccessPatternGenerator {
    /// Create a generator with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Draw `count` indices uniformly from `[0, domain_size)`, each rounded
    /// down to a multiple of `alignment`.
    ///
    /// `domain_size` must be non-zero; an `alignment` of zero is treated as
    /// element granularity.
    pub fn generate(&mut self, count: usize, domain_size: u32, alignment: u32) -> Vec<u32> {
        let alignment = alignment.max(1);
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = self.rng.gen_range(0..domain_size);
            indices.push(raw - raw % alignment);
        }
        indices
    }
}
