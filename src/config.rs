use serde::{Deserialize, Serialize};

use crate::TIME_EPSILON;
use crate::error::SimError;
use crate::tau_leap::DEFAULT_MAX_HALVINGS;

/// Upper bound on the number of points in a generated sample grid.
pub const MAX_SAMPLE_POINTS: usize = 10_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepperConfig {
    #[default]
    Exact,
    TauLeap {
        tau: f64,
        #[serde(default = "default_max_halvings")]
        max_halvings: u32,
    },
}

fn default_max_halvings() -> u32 {
    DEFAULT_MAX_HALVINGS
}

impl StepperConfig {
    pub fn tau_leap(tau: f64) -> Self {
        StepperConfig::TauLeap {
            tau,
            max_halvings: DEFAULT_MAX_HALVINGS,
        }
    }
}

/// How a dividing cell's volume is shared between its daughters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSplit {
    /// Both daughters receive half the parent volume.
    #[default]
    Equal,
    /// Daughters receive the same fractions `p` and `1 - p` used for molecules.
    Proportional,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivisionConfig {
    /// Mean volume at which a cell divides.
    pub volume: f64,
    /// Coefficient of variation of the per-cell division volume.
    pub volume_cv: f64,
    /// Spread σ of the split probability around one half.
    pub noise: f64,
    pub volume_split: VolumeSplit,
}

impl Default for DivisionConfig {
    fn default() -> Self {
        Self {
            volume: 2.0,
            volume_cv: 0.0,
            noise: 0.0,
            volume_split: VolumeSplit::Equal,
        }
    }
}

/// Source of randomness for the cells of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RngMode {
    /// One stream for the whole run, consumed in global event order.
    Shared,
    /// One stream per cell, derived from the parent's seed and daughter slot.
    #[default]
    PerLineage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunBudget {
    pub max_events: Option<u64>,
    pub max_cells: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub end_time: f64,
    pub sample_step: f64,
    /// Explicit sample grid; overrides `sample_step` when set.
    pub sample_times: Option<Vec<f64>>,
    pub initial_volume: f64,
    pub growth_rate: f64,
    pub division: DivisionConfig,
    pub stepper: StepperConfig,
    pub seed: Option<u64>,
    pub rng: RngMode,
    /// Keep every cell's event-level trajectory in addition to the sampled output.
    pub record_events: bool,
    pub budget: RunBudget,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            end_time: 10.0,
            sample_step: 0.1,
            sample_times: None,
            initial_volume: 1.0,
            growth_rate: std::f64::consts::LN_2,
            division: DivisionConfig::default(),
            stepper: StepperConfig::Exact,
            seed: None,
            rng: RngMode::PerLineage,
            record_events: false,
            budget: RunBudget::default(),
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidArgument(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidArgument(format!(
            "{} must be non-negative and finite, got {}",
            name, value
        )))
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        positive("end_time", self.end_time)?;
        positive("initial_volume", self.initial_volume)?;
        non_negative("growth_rate", self.growth_rate)?;
        positive("division.volume", self.division.volume)?;
        non_negative("division.volume_cv", self.division.volume_cv)?;
        non_negative("division.noise", self.division.noise)?;
        if let StepperConfig::TauLeap { tau, .. } = self.stepper {
            positive("tau", tau)?;
        }
        if self.budget.max_cells == Some(0) {
            return Err(SimError::InvalidArgument(
                "budget.max_cells must allow at least the founder cell".into(),
            ));
        }
        match &self.sample_times {
            Some(times) => validate_sample_times(times, self.end_time),
            None => {
                positive("sample_step", self.sample_step)?;
                grid_steps(self.end_time, self.sample_step).map(|_| ())
            }
        }
    }

    /// The shared grid every cell is sampled on.
    pub fn sample_grid(&self) -> Result<Vec<f64>, SimError> {
        self.validate()?;
        if let Some(times) = &self.sample_times {
            return Ok(times.clone());
        }
        let n_steps = grid_steps(self.end_time, self.sample_step)?;
        Ok((0..=n_steps)
            .map(|k| k as f64 * self.sample_step)
            .filter(|&t| t <= self.end_time)
            .collect())
    }
}

/// Largest `k` with `k * step <= end_time`, bounded by [`MAX_SAMPLE_POINTS`].
fn grid_steps(end_time: f64, step: f64) -> Result<usize, SimError> {
    let n_steps = (end_time / step + TIME_EPSILON).floor();
    if n_steps >= MAX_SAMPLE_POINTS as f64 {
        return Err(SimError::InvalidArgument(format!(
            "sample_step {} yields more than {} sample points",
            step, MAX_SAMPLE_POINTS
        )));
    }
    Ok(n_steps as usize)
}

fn validate_sample_times(times: &[f64], end_time: f64) -> Result<(), SimError> {
    if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(SimError::InvalidArgument(
            "sample_times must be finite and non-negative".into(),
        ));
    }
    if times.windows(2).any(|w| w[0] > w[1]) {
        return Err(SimError::InvalidArgument(
            "sample_times must be sorted in ascending order".into(),
        ));
    }
    if times.last().copied().unwrap_or(0.0) > end_time {
        return Err(SimError::InvalidArgument(
            "sample_times cannot exceed end_time".into(),
        ));
    }
    Ok(())
}
