//! When cells divide and how their content is shared.
//!
//! Molecules are split binomially: daughter 0 receives `Binomial(n, p)` copies
//! of every species and daughter 1 the remainder, so counts are conserved
//! exactly. The split probability is `p = 1/2 + η` with `η ~ N(0, σ)` drawn
//! once per division and shared by all species; with `σ = 0` no draw is made
//! and `p` is exactly one half.

use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution, Normal, StandardNormal};
use serde::Serialize;

use crate::config::{DivisionConfig, VolumeSplit};
use crate::error::SimError;

/// Split probabilities are kept inside `[MIN_SHARE, 1 - MIN_SHARE]` so both daughters keep a positive volume.
pub const MIN_SHARE: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Partition {
    /// Fraction of each species' molecules expected in daughter 0.
    pub probability: f64,
    pub counts: [Vec<i64>; 2],
    pub volumes: [f64; 2],
}

#[derive(Clone, Copy, Debug)]
pub struct DivisionPolicy {
    threshold_volume: f64,
    threshold_cv: f64,
    noise: f64,
    volume_split: VolumeSplit,
}

impl DivisionPolicy {
    pub fn new(config: &DivisionConfig) -> Result<Self, SimError> {
        if !config.volume.is_finite() || config.volume <= 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "division volume must be positive, got {}",
                config.volume
            )));
        }
        if !config.volume_cv.is_finite() || config.volume_cv < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "division volume_cv must be non-negative, got {}",
                config.volume_cv
            )));
        }
        if !config.noise.is_finite() || config.noise < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "division noise must be non-negative, got {}",
                config.noise
            )));
        }
        Ok(Self {
            threshold_volume: config.volume,
            threshold_cv: config.volume_cv,
            noise: config.noise,
            volume_split: config.volume_split,
        })
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }

    /// Division volume for a cell born with `birth_volume`, never below it.
    pub fn draw_threshold(&self, birth_volume: f64, rng: &mut ChaCha8Rng) -> f64 {
        let threshold = if self.threshold_cv > 0.0 {
            let xi: f64 = StandardNormal.sample(rng);
            self.threshold_volume * (1.0 + self.threshold_cv * xi)
        } else {
            self.threshold_volume
        };
        threshold.max(birth_volume)
    }

    pub fn split_probability(&self, rng: &mut ChaCha8Rng) -> Result<f64, SimError> {
        if self.noise == 0.0 {
            return Ok(0.5);
        }
        let normal = Normal::new(0.0, self.noise).map_err(|e| SimError::InvalidArgument(e.to_string()))?;
        let eta: f64 = normal.sample(rng);
        Ok((0.5 + eta).clamp(MIN_SHARE, 1.0 - MIN_SHARE))
    }

    pub fn partition(&self, counts: &[i64], volume: f64, rng: &mut ChaCha8Rng) -> Result<Partition, SimError> {
        let probability = self.split_probability(rng)?;
        let mut first = Vec::with_capacity(counts.len());
        let mut second = Vec::with_capacity(counts.len());
        for (species, &n) in counts.iter().enumerate() {
            let n = u64::try_from(n).map_err(|_| {
                SimError::InvalidArgument(format!("species {} has negative count {}", species, n))
            })?;
            let binomial =
                Binomial::new(n, probability).map_err(|e| SimError::InvalidArgument(e.to_string()))?;
            let share = binomial.sample(rng);
            first.push(share as i64);
            second.push((n - share) as i64);
        }
        let volumes = match self.volume_split {
            VolumeSplit::Equal => [volume / 2.0, volume / 2.0],
            VolumeSplit::Proportional => [volume * probability, volume * (1.0 - probability)],
        };
        Ok(Partition {
            probability,
            counts: [first, second],
            volumes,
        })
    }
}
