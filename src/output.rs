//! Sampled results of a run.
//!
//! Every cell that ever existed contributes one [`CellSeries`]: a contiguous
//! block of the shared sample grid covering its lifetime `[birth, division)`.
//! Grid times outside that block are absent rather than zero.

use std::ops::Range;

use serde::Serialize;

use crate::cell::{Cell, CellId, CellPhase};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DivisionRecord {
    pub parent: CellId,
    pub daughters: [CellId; 2],
    pub time: f64,
    pub parent_volume: f64,
    pub parent_counts: Vec<i64>,
    /// Split probability used for daughter 0.
    pub probability: f64,
    pub daughter_volumes: [f64; 2],
    pub daughter_counts: [Vec<i64>; 2],
}

impl DivisionRecord {
    pub fn conserves_content(&self) -> bool {
        self.parent_counts
            .iter()
            .enumerate()
            .all(|(s, &n)| self.daughter_counts[0][s] + self.daughter_counts[1][s] == n)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellSeries {
    pub id: CellId,
    pub parent: Option<CellId>,
    pub generation: u32,
    pub birth_time: f64,
    pub division_time: Option<f64>,
    /// Grid index of the first sample in this series.
    pub first_sample: usize,
    pub n_species: usize,
    pub volumes: Vec<f64>,
    /// Row-major `len() × n_species` counts.
    pub counts: Vec<i64>,
}

impl CellSeries {
    pub(crate) fn from_cell(cell: &Cell) -> Self {
        let division_time = match cell.phase() {
            CellPhase::Divided { time, .. } => Some(time),
            CellPhase::Growing => None,
        };
        Self {
            id: cell.id(),
            parent: cell.parent(),
            generation: cell.generation(),
            birth_time: cell.birth_time(),
            division_time,
            first_sample: cell.segment.first,
            n_species: cell.counts().len(),
            volumes: cell.segment.volumes.clone(),
            counts: cell.segment.counts.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Grid indices covered by this series.
    pub fn samples(&self) -> Range<usize> {
        self.first_sample..self.first_sample + self.len()
    }

    pub fn volume(&self, sample: usize) -> Option<f64> {
        sample
            .checked_sub(self.first_sample)
            .and_then(|offset| self.volumes.get(offset).copied())
    }

    pub fn counts_at(&self, sample: usize) -> Option<&[i64]> {
        let offset = sample.checked_sub(self.first_sample)?;
        if offset >= self.len() {
            return None;
        }
        let start = offset * self.n_species;
        Some(&self.counts[start..start + self.n_species])
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputRecord {
    pub sample_times: Vec<f64>,
    pub species: Vec<String>,
    pub cells: Vec<CellSeries>,
    pub divisions: Vec<DivisionRecord>,
}

impl OutputRecord {
    pub fn n_samples(&self) -> usize {
        self.sample_times.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s == name)
    }

    pub fn volume(&self, sample: usize, cell: CellId) -> Option<f64> {
        self.cells.get(cell)?.volume(sample)
    }

    pub fn count(&self, sample: usize, cell: CellId, species: usize) -> Option<i64> {
        self.cells
            .get(cell)?
            .counts_at(sample)
            .and_then(|row| row.get(species).copied())
    }

    pub fn alive_at(&self, sample: usize) -> impl Iterator<Item = &CellSeries> + '_ {
        self.cells.iter().filter(move |c| c.samples().contains(&sample))
    }

    pub fn population_size(&self, sample: usize) -> usize {
        self.alive_at(sample).count()
    }

    /// Counts of one species in every cell alive at `sample`, in cell-id order.
    pub fn species_across_cells(&self, sample: usize, species: usize) -> Vec<i64> {
        self.alive_at(sample)
            .filter_map(|c| c.counts_at(sample).map(|row| row[species]))
            .collect()
    }

    /// Rows are sample times, columns are cell ids.
    pub fn volume_table(&self) -> Vec<Vec<Option<f64>>> {
        (0..self.n_samples())
            .map(|s| self.cells.iter().map(|c| c.volume(s)).collect())
            .collect()
    }

    pub fn count_table(&self, species: usize) -> Vec<Vec<Option<i64>>> {
        (0..self.n_samples())
            .map(|s| {
                self.cells
                    .iter()
                    .map(|c| c.counts_at(s).map(|row| row[species]))
                    .collect()
            })
            .collect()
    }
}
