//! Exact stepper: Gillespie's direct method.
//!
//! Each step draws a waiting time `Exp(A)` from the total propensity `A`,
//! then picks the firing reaction by a uniform draw on `[0, A)` against the
//! cumulative propensities in declaration order.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

use crate::error::SimError;
use crate::network::ReactionNetwork;
use crate::state::ChemicalState;
use crate::stepper::{FireReport, Stepper};

/// Waiting time until the next reaction, or `Degenerate` when nothing can fire.
pub fn waiting_time(state: &ChemicalState, rng: &mut ChaCha8Rng) -> Result<f64, SimError> {
    let total = state.total_propensity();
    if !(total > 0.0) {
        return Err(SimError::Degenerate);
    }
    let exp = Exp::new(total).map_err(|e| SimError::InvalidArgument(e.to_string()))?;
    Ok(exp.sample(rng))
}

/// Selects and applies one reaction; returns its index.
pub fn fire_one(network: &ReactionNetwork, state: &mut ChemicalState, rng: &mut ChaCha8Rng) -> usize {
    let u: f64 = rng.r#gen();
    let chosen = state.select(u * state.total_propensity());
    state.fire(network, chosen);
    chosen
}

/// Runs the direct method from `from` until the next event would pass `until`.
///
/// Returns the number of reactions fired. Stops early if the state freezes.
pub fn advance_exact(
    network: &ReactionNetwork,
    state: &mut ChemicalState,
    from: f64,
    until: f64,
    rng: &mut ChaCha8Rng,
) -> Result<u64, SimError> {
    let mut now = from;
    let mut fired = 0u64;
    loop {
        let tau = match waiting_time(state, rng) {
            Ok(tau) => tau,
            Err(SimError::Degenerate) => return Ok(fired),
            Err(err) => return Err(err),
        };
        if now + tau > until {
            return Ok(fired);
        }
        now += tau;
        fire_one(network, state, rng);
        fired += 1;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExactStepper;

impl Stepper for ExactStepper {
    fn propose(&self, state: &ChemicalState, now: f64, rng: &mut ChaCha8Rng) -> Result<f64, SimError> {
        Ok(now + waiting_time(state, rng)?)
    }

    fn fire(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        _from: f64,
        _to: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError> {
        let chosen = fire_one(network, state, rng);
        tracing::trace!(reaction = network.reactions()[chosen].name(), "reaction fired");
        Ok(FireReport {
            reactions_fired: 1,
            ..FireReport::default()
        })
    }

    // Nothing to do: the pending waiting time is dropped and redrawn after division.
    fn interrupt(
        &self,
        _network: &ReactionNetwork,
        _state: &mut ChemicalState,
        _from: f64,
        _at: f64,
        _rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError> {
        Ok(FireReport::default())
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}
