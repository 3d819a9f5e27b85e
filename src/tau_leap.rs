//! Approximate stepper: fixed-interval tau-leaping.
//!
//! A leap of length `dt` draws `k_j ~ Poisson(a_j · dt)` firings for every
//! reaction from the propensities at the start of the leap and applies them
//! all at once. A leap that would drive a species negative is rejected with
//! [`SimError::NegativePopulation`] and leaves the state untouched.
//!
//! [`TauLeapStepper`] handles rejections by halving the leap up to
//! `max_halvings` times and, once those are used up, finishing the interval
//! with the exact method.

use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};

use crate::error::SimError;
use crate::network::ReactionNetwork;
use crate::ssa::advance_exact;
use crate::state::ChemicalState;
use crate::stepper::{FireReport, Stepper};

pub const DEFAULT_MAX_HALVINGS: u32 = 8;

/// Performs one leap of length `dt`; returns the total number of firings.
pub fn leap(
    network: &ReactionNetwork,
    state: &mut ChemicalState,
    dt: f64,
    rng: &mut ChaCha8Rng,
) -> Result<u64, SimError> {
    let mut firings = vec![0u64; network.n_reactions()];
    let mut total = 0u64;
    for (slot, &propensity) in firings.iter_mut().zip(state.propensities()) {
        let mean = propensity * dt;
        if mean > 0.0 {
            let poisson = Poisson::new(mean).map_err(|e| SimError::InvalidArgument(e.to_string()))?;
            let k: f64 = poisson.sample(rng);
            *slot = k as u64;
            total += *slot;
        }
    }
    if total == 0 {
        return Ok(0);
    }
    let next = state.project(network, &firings)?;
    if let Some(species) = next.iter().position(|&c| c < 0) {
        return Err(SimError::NegativePopulation {
            species,
            count: next[species],
            tau: dt,
        });
    }
    state.replace_counts(network, next);
    Ok(total)
}

#[derive(Clone, Copy, Debug)]
pub struct TauLeapStepper {
    tau: f64,
    max_halvings: u32,
}

impl TauLeapStepper {
    pub fn new(tau: f64, max_halvings: u32) -> Result<Self, SimError> {
        if !tau.is_finite() || tau <= 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "leap interval tau must be positive and finite, got {}",
                tau
            )));
        }
        Ok(Self { tau, max_halvings })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    fn advance(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        from: f64,
        to: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError> {
        let mut report = FireReport::default();
        let mut now = from;
        while now < to {
            let remaining = to - now;
            let mut dt = remaining.min(self.tau);
            let mut halvings = 0u32;
            loop {
                match leap(network, state, dt, rng) {
                    Ok(fired) => {
                        report.reactions_fired += fired;
                        now = if dt >= remaining { to } else { now + dt };
                        break;
                    }
                    Err(err @ SimError::NegativePopulation { .. }) => {
                        report.rejected_leaps += 1;
                        report.last_rejection = Some(err);
                        if halvings >= self.max_halvings {
                            report.reactions_fired += advance_exact(network, state, now, to, rng)?;
                            report.exact_fallback = true;
                            return Ok(report);
                        }
                        halvings += 1;
                        dt /= 2.0;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(report)
    }
}

impl Stepper for TauLeapStepper {
    fn propose(&self, state: &ChemicalState, now: f64, _rng: &mut ChaCha8Rng) -> Result<f64, SimError> {
        if !(state.total_propensity() > 0.0) {
            return Err(SimError::Degenerate);
        }
        Ok(now + self.tau)
    }

    fn fire(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        from: f64,
        to: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError> {
        self.advance(network, state, from, to, rng)
    }

    fn interrupt(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        from: f64,
        at: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError> {
        self.advance(network, state, from, at, rng)
    }

    fn name(&self) -> &'static str {
        "tau-leap"
    }
}
