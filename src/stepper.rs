//! The interface shared by the exact and tau-leaping steppers.
//!
//! Scheduling is split in two halves so the population simulator can order
//! events across cells: [`Stepper::propose`] returns the absolute time of a
//! cell's next chemical event without touching the state, and
//! [`Stepper::fire`] later commits it. If the cell divides first,
//! [`Stepper::interrupt`] is called at the division instant instead.

use rand_chacha::ChaCha8Rng;

use crate::config::StepperConfig;
use crate::error::SimError;
use crate::network::ReactionNetwork;
use crate::ssa::ExactStepper;
use crate::state::ChemicalState;
use crate::tau_leap::TauLeapStepper;

/// What happened to a cell's chemistry during one committed step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FireReport {
    /// Individual reaction firings applied.
    pub reactions_fired: u64,
    /// Leaps rejected with [`SimError::NegativePopulation`] before one was accepted.
    pub rejected_leaps: u32,
    /// The most recent rejection, if any.
    pub last_rejection: Option<SimError>,
    /// Part of the interval had to be advanced with the exact method.
    pub exact_fallback: bool,
}

pub trait Stepper: Send + Sync {
    /// Absolute time of the next chemical event after `now`.
    ///
    /// Fails with [`SimError::Degenerate`] when no reaction can fire.
    fn propose(&self, state: &ChemicalState, now: f64, rng: &mut ChaCha8Rng) -> Result<f64, SimError>;

    /// Commits the event proposed for time `to`; `from` is the cell's previous event time.
    fn fire(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        from: f64,
        to: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError>;

    /// Brings the chemistry from `from` up to `at`, when a division preempts the proposed event.
    fn interrupt(
        &self,
        network: &ReactionNetwork,
        state: &mut ChemicalState,
        from: f64,
        at: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<FireReport, SimError>;

    fn name(&self) -> &'static str;
}

pub fn build_stepper(config: &StepperConfig) -> Result<Box<dyn Stepper>, SimError> {
    match *config {
        StepperConfig::Exact => Ok(Box::new(ExactStepper)),
        StepperConfig::TauLeap { tau, max_halvings } => {
            Ok(Box::new(TauLeapStepper::new(tau, max_halvings)?))
        }
    }
}
