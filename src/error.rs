use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a run stopped before reaching its end time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The external [`AbortHandle`](crate::AbortHandle) was triggered.
    Signal,
    /// `budget.max_events` events were processed.
    EventBudget,
    /// The next division would exceed `budget.max_cells`.
    CellBudget,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Signal => f.write_str("abort signal"),
            AbortReason::EventBudget => f.write_str("event budget exhausted"),
            AbortReason::CellBudget => f.write_str("cell budget exhausted"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("degenerate chemistry: total propensity is zero")]
    Degenerate,
    #[error("leap of tau = {tau} would drive species {species} to {count}")]
    NegativePopulation { species: usize, count: i64, tau: f64 },
    #[error("run aborted at t = {time} ({reason})")]
    AbortRequested { time: f64, reason: AbortReason },
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl SimError {
    /// Per-cell conditions that are reported but do not stop the run.
    pub fn is_cell_local(&self) -> bool {
        matches!(self, SimError::Degenerate | SimError::NegativePopulation { .. })
    }
}
