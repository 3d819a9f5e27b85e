//! A single growing cell.
//!
//! Between divisions the volume follows `V(t) = V0 · exp(g · (t − birth))`
//! and the chemistry evolves through the run's stepper. The cell divides when
//! its volume reaches its division threshold; the crossing time has a closed
//! form, so divisions are scheduled exactly rather than detected after the fact.

use serde::Serialize;

use crate::state::ChemicalState;

/// Stable index of a cell in the population arena.
pub type CellId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum CellPhase {
    Growing,
    /// Terminal. The cell's records are sealed at `time`.
    Divided { time: f64, daughters: [CellId; 2] },
}

/// Time at which a cell born at `birth_time` with `birth_volume` reaches `threshold`.
pub fn division_time(birth_time: f64, birth_volume: f64, threshold: f64, growth_rate: f64) -> f64 {
    if threshold <= birth_volume {
        birth_time
    } else if growth_rate <= 0.0 {
        f64::INFINITY
    } else {
        birth_time + (threshold / birth_volume).ln() / growth_rate
    }
}

/// Event-level history of one cell.
///
/// States are stored in a flat `Vec<i64>` of `n_points * n_species`, one row per recorded time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub volumes: Vec<f64>,
    pub n_species: usize,
    pub states: Vec<i64>,
}

impl Trajectory {
    fn new(n_species: usize) -> Self {
        Self {
            n_species,
            ..Self::default()
        }
    }

    fn push(&mut self, time: f64, volume: f64, state: &[i64]) {
        self.times.push(time);
        self.volumes.push(volume);
        self.states.extend_from_slice(state);
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn state_at(&self, i: usize) -> &[i64] {
        let start = i * self.n_species;
        &self.states[start..start + self.n_species]
    }

    pub fn states_iter(&self) -> impl Iterator<Item = &[i64]> {
        self.states.chunks_exact(self.n_species.max(1))
    }
}

/// A cell's values on the shared sample grid, starting at grid index `first`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SampleSegment {
    pub(crate) first: usize,
    next: usize,
    pub(crate) volumes: Vec<f64>,
    pub(crate) counts: Vec<i64>,
}

/// Everything needed to bring a new cell into existence.
pub(crate) struct CellBirth {
    pub(crate) id: CellId,
    pub(crate) parent: Option<CellId>,
    pub(crate) generation: u32,
    pub(crate) birth_time: f64,
    pub(crate) birth_volume: f64,
    pub(crate) growth_rate: f64,
    pub(crate) division_volume: f64,
    pub(crate) chem: ChemicalState,
    pub(crate) seed: u64,
    pub(crate) frozen: bool,
    pub(crate) record_events: bool,
}

#[derive(Clone, Debug)]
pub struct Cell {
    id: CellId,
    parent: Option<CellId>,
    generation: u32,
    birth_time: f64,
    birth_volume: f64,
    growth_rate: f64,
    division_volume: f64,
    phase: CellPhase,
    pub(crate) chem: ChemicalState,
    /// Time of the last applied chemical step.
    pub(crate) clock: f64,
    /// Chemistry has stopped; the cell only grows and divides.
    pub(crate) frozen: bool,
    pub(crate) seed: u64,
    pub(crate) segment: SampleSegment,
    history: Option<Trajectory>,
}

impl Cell {
    pub(crate) fn new(birth: CellBirth, grid: &[f64]) -> Self {
        let first = grid.partition_point(|&s| s < birth.birth_time);
        let history = birth.record_events.then(|| {
            let mut trajectory = Trajectory::new(birth.chem.counts().len());
            trajectory.push(birth.birth_time, birth.birth_volume, birth.chem.counts());
            trajectory
        });
        Self {
            id: birth.id,
            parent: birth.parent,
            generation: birth.generation,
            birth_time: birth.birth_time,
            birth_volume: birth.birth_volume,
            growth_rate: birth.growth_rate,
            division_volume: birth.division_volume,
            phase: CellPhase::Growing,
            chem: birth.chem,
            clock: birth.birth_time,
            frozen: birth.frozen,
            seed: birth.seed,
            segment: SampleSegment {
                first,
                next: first,
                volumes: Vec::new(),
                counts: Vec::new(),
            },
            history,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn parent(&self) -> Option<CellId> {
        self.parent
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn birth_time(&self) -> f64 {
        self.birth_time
    }

    pub fn birth_volume(&self) -> f64 {
        self.birth_volume
    }

    pub fn division_volume(&self) -> f64 {
        self.division_volume
    }

    pub fn phase(&self) -> CellPhase {
        self.phase
    }

    pub fn is_growing(&self) -> bool {
        self.phase == CellPhase::Growing
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn counts(&self) -> &[i64] {
        self.chem.counts()
    }

    pub fn history(&self) -> Option<&Trajectory> {
        self.history.as_ref()
    }

    pub fn volume_at(&self, t: f64) -> f64 {
        self.birth_volume * (self.growth_rate * (t - self.birth_time)).exp()
    }

    pub fn division_time(&self) -> f64 {
        match self.phase {
            CellPhase::Divided { time, .. } => time,
            CellPhase::Growing => division_time(
                self.birth_time,
                self.birth_volume,
                self.division_volume,
                self.growth_rate,
            ),
        }
    }

    /// Records the current state on every grid time before `limit` (or at it, if `inclusive`).
    pub(crate) fn record_until(&mut self, grid: &[f64], limit: f64, inclusive: bool) {
        while let Some(&s) = grid.get(self.segment.next) {
            if s < limit || (inclusive && s == limit) {
                let volume = self.volume_at(s);
                self.segment.volumes.push(volume);
                self.segment.counts.extend_from_slice(self.chem.counts());
                self.segment.next += 1;
            } else {
                break;
            }
        }
    }

    pub(crate) fn log_event(&mut self, time: f64) {
        if self.history.is_some() {
            let volume = self.volume_at(time);
            if let Some(history) = self.history.as_mut() {
                history.push(time, volume, self.chem.counts());
            }
        }
    }

    /// Closes the cell at its division instant; the last history point is the division itself.
    pub(crate) fn seal(&mut self, time: f64, daughters: [CellId; 2]) {
        debug_assert!(self.is_growing());
        if let Some(history) = self.history.as_mut() {
            history.push(time, self.division_volume, self.chem.counts());
        }
        self.phase = CellPhase::Divided { time, daughters };
    }
}
