//! Event-driven simulation of a growing, dividing population.
//!
//! Cells live in a flat arena indexed by [`CellId`]; divided cells stay in the
//! arena, sealed, and their daughters are appended. A binary min-heap holds
//! exactly one pending event per active cell, keyed by `(time, cell id)`, so
//! events are processed in global time order with ties broken by id.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::mem::{Discriminant, discriminant};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::cell::{Cell, CellBirth, CellId, Trajectory};
use crate::config::{RngMode, RunConfig};
use crate::derive_seed;
use crate::division::DivisionPolicy;
use crate::error::{AbortReason, SimError};
use crate::network::ReactionNetwork;
use crate::output::{CellSeries, DivisionRecord, OutputRecord};
use crate::state::ChemicalState;
use crate::stepper::{Stepper, build_stepper};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Chemical,
    Division,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub time: f64,
    pub cell: CellId,
    pub kind: EventKind,
}

#[derive(Clone, Copy, Debug)]
struct Scheduled {
    time: f64,
    cell: CellId,
    kind: EventKind,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so that `BinaryHeap` pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

/// A non-fatal condition raised by one cell, with how often it recurred.
#[derive(Clone, Debug, PartialEq)]
pub struct CellIssue {
    pub cell: CellId,
    /// Time of the first occurrence.
    pub time: f64,
    pub error: SimError,
    pub occurrences: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub clock: f64,
    pub end_time: f64,
    pub completed: bool,
    pub aborted: Option<AbortReason>,
    pub events: u64,
    pub reactions_fired: u64,
    pub divisions: usize,
    pub total_cells: usize,
    pub active_cells: usize,
    pub issues: Vec<CellIssue>,
}

/// Shared flag that asks a running simulation to stop before its next event.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunStatus {
    Pending,
    Completed,
    Aborted(AbortReason),
}

enum RngPool {
    Shared(ChaCha8Rng),
    /// One stream per cell, indexed by cell id.
    PerLineage(Vec<ChaCha8Rng>),
}

impl RngPool {
    fn get(&mut self, cell: CellId) -> &mut ChaCha8Rng {
        match self {
            RngPool::Shared(rng) => rng,
            RngPool::PerLineage(rngs) => &mut rngs[cell],
        }
    }

    /// Stream for the next cell to be appended to the arena.
    fn spawn(&mut self, seed: u64) -> &mut ChaCha8Rng {
        match self {
            RngPool::Shared(rng) => rng,
            RngPool::PerLineage(rngs) => {
                let idx = rngs.len();
                rngs.push(ChaCha8Rng::seed_from_u64(seed));
                &mut rngs[idx]
            }
        }
    }
}

pub struct PopulationSimulator<'a> {
    network: &'a ReactionNetwork,
    config: RunConfig,
    grid: Vec<f64>,
    stepper: Box<dyn Stepper>,
    policy: DivisionPolicy,
    cells: Vec<Cell>,
    queue: BinaryHeap<Scheduled>,
    rngs: RngPool,
    clock: f64,
    events: u64,
    reactions_fired: u64,
    active: usize,
    divisions: Vec<DivisionRecord>,
    issues: Vec<CellIssue>,
    issue_slots: HashMap<(CellId, Discriminant<SimError>), usize>,
    abort: AbortHandle,
    status: RunStatus,
}

impl<'a> PopulationSimulator<'a> {
    /// Builds the founder cell at `t = 0` from the network's initial counts.
    pub fn new(network: &'a ReactionNetwork, config: RunConfig) -> Result<Self, SimError> {
        let grid = config.sample_grid()?;
        let stepper = build_stepper(&config.stepper)?;
        let policy = DivisionPolicy::new(&config.division)?;
        let founder_seed = derive_seed(config.seed, 0);
        let rngs = match config.rng {
            RngMode::Shared => RngPool::Shared(ChaCha8Rng::seed_from_u64(founder_seed)),
            RngMode::PerLineage => RngPool::PerLineage(Vec::new()),
        };
        let mut sim = Self {
            network,
            config,
            grid,
            stepper,
            policy,
            cells: Vec::new(),
            queue: BinaryHeap::new(),
            rngs,
            clock: 0.0,
            events: 0,
            reactions_fired: 0,
            active: 0,
            divisions: Vec::new(),
            issues: Vec::new(),
            issue_slots: HashMap::new(),
            abort: AbortHandle::new(),
            status: RunStatus::Pending,
        };
        let chem = ChemicalState::initial(network)?;
        let volume = sim.config.initial_volume;
        let threshold = sim.policy.draw_threshold(volume, sim.rngs.spawn(founder_seed));
        sim.add_cell(CellBirth {
            id: 0,
            parent: None,
            generation: 0,
            birth_time: 0.0,
            birth_volume: volume,
            growth_rate: sim.config.growth_rate,
            division_volume: threshold,
            chem,
            seed: founder_seed,
            frozen: false,
            record_events: sim.config.record_events,
        });
        sim.schedule(0)?;
        Ok(sim)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn network(&self) -> &ReactionNetwork {
        self.network
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn sample_times(&self) -> &[f64] {
        &self.grid
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn history(&self, id: CellId) -> Option<&Trajectory> {
        self.cells.get(id).and_then(Cell::history)
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn divisions(&self) -> &[DivisionRecord] {
        &self.divisions
    }

    pub fn issues(&self) -> &[CellIssue] {
        &self.issues
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Why the most recent `run` or `step` stopped early, if it did.
    pub fn aborted(&self) -> Option<AbortReason> {
        match self.status {
            RunStatus::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Runs until the next pending event lies beyond `end_time`.
    ///
    /// On abort, returns [`SimError::AbortRequested`]; every record sealed so
    /// far stays valid and the run can be resumed by calling `run` again.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        info!(
            stepper = self.stepper.name(),
            end_time = self.config.end_time,
            division_noise = self.policy.noise(),
            cells = self.cells.len(),
            "population run started"
        );
        while self.step()?.is_some() {}
        let summary = self.summary();
        info!(
            events = summary.events,
            divisions = summary.divisions,
            cells = summary.total_cells,
            issues = summary.issues.len(),
            "population run completed"
        );
        Ok(summary)
    }

    /// Processes the single earliest pending event, or returns `None` once the run is complete.
    pub fn step(&mut self) -> Result<Option<EventRecord>, SimError> {
        if self.status == RunStatus::Completed {
            return Ok(None);
        }
        let next = match self.queue.peek() {
            Some(&next) if next.time <= self.config.end_time => next,
            _ => {
                self.complete();
                return Ok(None);
            }
        };
        if let Some(reason) = self.abort_reason(&next) {
            return Err(self.abort_at(reason));
        }
        self.queue.pop();
        self.status = RunStatus::Pending;
        debug_assert!(next.time >= self.clock, "global clock went backwards");
        self.clock = next.time;
        self.events += 1;
        match next.kind {
            EventKind::Chemical => self.process_chemical(next.cell, next.time)?,
            EventKind::Division => self.process_division(next.cell, next.time)?,
        }
        Ok(Some(EventRecord {
            time: next.time,
            cell: next.cell,
            kind: next.kind,
        }))
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            clock: self.clock,
            end_time: self.config.end_time,
            completed: self.is_completed(),
            aborted: self.aborted(),
            events: self.events,
            reactions_fired: self.reactions_fired,
            divisions: self.divisions.len(),
            total_cells: self.cells.len(),
            active_cells: self.active,
            issues: self.issues.clone(),
        }
    }

    pub fn output(&self) -> OutputRecord {
        OutputRecord {
            sample_times: self.grid.clone(),
            species: self.network.species_names().to_vec(),
            cells: self.cells.iter().map(CellSeries::from_cell).collect(),
            divisions: self.divisions.clone(),
        }
    }

    fn abort_reason(&self, next: &Scheduled) -> Option<AbortReason> {
        if self.abort.is_aborted() {
            return Some(AbortReason::Signal);
        }
        if self.config.budget.max_events.is_some_and(|max| self.events >= max) {
            return Some(AbortReason::EventBudget);
        }
        if next.kind == EventKind::Division
            && self
                .config
                .budget
                .max_cells
                .is_some_and(|max| self.cells.len() + 2 > max)
        {
            return Some(AbortReason::CellBudget);
        }
        None
    }

    fn abort_at(&mut self, reason: AbortReason) -> SimError {
        // Only samples strictly before the clock are final: events at the
        // clock itself may still be pending for other cells.
        let clock = self.clock;
        for cell in self.cells.iter_mut().filter(|c| c.is_growing()) {
            cell.record_until(&self.grid, clock, false);
        }
        self.status = RunStatus::Aborted(reason);
        warn!(time = clock, %reason, "population run aborted");
        SimError::AbortRequested {
            time: clock,
            reason,
        }
    }

    fn complete(&mut self) {
        let end_time = self.config.end_time;
        for cell in self.cells.iter_mut().filter(|c| c.is_growing()) {
            cell.record_until(&self.grid, end_time, true);
        }
        self.status = RunStatus::Completed;
    }

    fn add_cell(&mut self, birth: CellBirth) {
        debug_assert_eq!(birth.id, self.cells.len());
        self.cells.push(Cell::new(birth, &self.grid));
        self.active += 1;
    }

    fn schedule(&mut self, id: CellId) -> Result<(), SimError> {
        let rng = self.rngs.get(id);
        let cell = &mut self.cells[id];
        let mut degenerate_at = None;
        let chemical = if cell.frozen {
            f64::INFINITY
        } else {
            match self.stepper.propose(&cell.chem, cell.clock, rng) {
                Ok(time) => time,
                Err(SimError::Degenerate) => {
                    cell.frozen = true;
                    degenerate_at = Some(cell.clock);
                    f64::INFINITY
                }
                Err(err) => return Err(err),
            }
        };
        let division = cell.division_time();
        if let Some(time) = degenerate_at {
            self.note_issue(id, time, SimError::Degenerate, 1);
        }
        let next = if chemical <= division {
            (chemical, EventKind::Chemical)
        } else {
            (division, EventKind::Division)
        };
        if next.0.is_finite() {
            self.queue.push(Scheduled {
                time: next.0,
                cell: id,
                kind: next.1,
            });
        }
        Ok(())
    }

    fn process_chemical(&mut self, id: CellId, time: f64) -> Result<(), SimError> {
        let network = self.network;
        let rng = self.rngs.get(id);
        let cell = &mut self.cells[id];
        cell.record_until(&self.grid, time, false);
        let report = self.stepper.fire(network, &mut cell.chem, cell.clock, time, rng)?;
        cell.clock = time;
        cell.log_event(time);
        trace!(cell = id, time, fired = report.reactions_fired, "chemical event");
        self.reactions_fired += report.reactions_fired;
        if let Some(err) = report.last_rejection {
            self.note_issue(id, time, err, u64::from(report.rejected_leaps));
        }
        self.schedule(id)
    }

    fn process_division(&mut self, id: CellId, time: f64) -> Result<(), SimError> {
        let network = self.network;
        let rng = self.rngs.get(id);
        let cell = &mut self.cells[id];
        cell.record_until(&self.grid, time, false);
        let report = self.stepper.interrupt(network, &mut cell.chem, cell.clock, time, rng)?;
        cell.clock = time;
        let parent_counts = cell.counts().to_vec();
        let parent_volume = cell.division_volume();
        let parent_seed = cell.seed;
        let generation = cell.generation() + 1;
        let frozen = cell.frozen;
        self.reactions_fired += report.reactions_fired;
        if let Some(err) = report.last_rejection {
            self.note_issue(id, time, err, u64::from(report.rejected_leaps));
        }

        let partition = self
            .policy
            .partition(&parent_counts, parent_volume, self.rngs.get(id))?;
        let first = self.cells.len();
        let daughters = [first, first + 1];
        for (slot, &daughter) in daughters.iter().enumerate() {
            let seed = derive_seed(Some(parent_seed), slot as u64);
            let volume = partition.volumes[slot];
            let threshold = self.policy.draw_threshold(volume, self.rngs.spawn(seed));
            let chem = ChemicalState::new(network, partition.counts[slot].clone())?;
            self.add_cell(CellBirth {
                id: daughter,
                parent: Some(id),
                generation,
                birth_time: time,
                birth_volume: volume,
                growth_rate: self.config.growth_rate,
                division_volume: threshold,
                chem,
                seed,
                frozen,
                record_events: self.config.record_events,
            });
        }
        self.cells[id].seal(time, daughters);
        self.active -= 1;
        debug!(
            parent = id,
            daughters = ?daughters,
            time,
            probability = partition.probability,
            "cell divided"
        );
        self.divisions.push(DivisionRecord {
            parent: id,
            daughters,
            time,
            parent_volume,
            parent_counts,
            probability: partition.probability,
            daughter_volumes: partition.volumes,
            daughter_counts: partition.counts,
        });
        for daughter in daughters {
            self.schedule(daughter)?;
        }
        Ok(())
    }

    fn note_issue(&mut self, cell: CellId, time: f64, error: SimError, occurrences: u64) {
        debug_assert!(error.is_cell_local());
        let key = (cell, discriminant(&error));
        if let Some(&slot) = self.issue_slots.get(&key) {
            self.issues[slot].occurrences += occurrences;
            return;
        }
        warn!(cell, time, %error, "cell issue");
        self.issue_slots.insert(key, self.issues.len());
        self.issues.push(CellIssue {
            cell,
            time,
            error,
            occurrences,
        });
    }
}
