use crate::network::{Reaction, ReactionNetwork};

/// Number of ways to pick `count` molecules out of `available`, as `f64`.
#[inline]
pub fn combinations(available: i64, count: i64) -> f64 {
    match count {
        0 => 1.0,
        _ if available < count => 0.0,
        1 => available as f64,
        2 => available as f64 * (available - 1) as f64 / 2.0,
        _ => {
            let mut acc = 1.0;
            for i in 0..count {
                acc *= (available - i) as f64 / (i + 1) as f64;
            }
            acc
        }
    }
}

impl Reaction {
    /// Mass-action propensity in the given state.
    #[inline]
    pub fn propensity(&self, state: &[i64]) -> f64 {
        let mut propensity = self.rate_constant;
        for reactant in &self.reactants {
            let available = state[reactant.species];
            if available < reactant.count {
                return 0.0;
            }
            propensity *= combinations(available, reactant.count);
        }
        propensity
    }
}

pub fn recompute_propensities(reactions: &[Reaction], state: &[i64], propensities: &mut [f64]) -> f64 {
    let mut total = 0.0;
    for (slot, reaction) in propensities.iter_mut().zip(reactions) {
        let value = reaction.propensity(state);
        total += value;
        *slot = value;
    }
    total
}

pub fn total_propensity(network: &ReactionNetwork, state: &[i64]) -> f64 {
    network.reactions().iter().map(|r| r.propensity(state)).sum()
}

/// Binary sum tree over reaction propensities.
///
/// Leaves hold the propensities in declaration order; each inner node holds
/// the sum of its children, recomputed from the children on every update so
/// the running total never accumulates drift.
#[derive(Clone, Debug)]
pub struct PropensityTree {
    len: usize,
    leaf_count: usize,
    data: Vec<f64>,
}

impl PropensityTree {
    pub fn new(len: usize) -> Self {
        let base = len.max(1);
        let leaf_count = base.next_power_of_two();
        Self {
            len,
            leaf_count,
            data: vec![0.0; leaf_count * 2],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn rebuild(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.len);
        self.data.fill(0.0);
        for (idx, &value) in values.iter().enumerate() {
            self.data[self.leaf_count + idx] = value;
        }
        for idx in (1..self.leaf_count).rev() {
            self.data[idx] = self.data[idx << 1] + self.data[idx << 1 | 1];
        }
    }

    pub fn total(&self) -> f64 {
        self.data[1]
    }

    pub fn leaf(&self, idx: usize) -> f64 {
        self.data[self.leaf_count + idx]
    }

    pub fn update(&mut self, idx: usize, value: f64) {
        let mut pos = self.leaf_count + idx;
        self.data[pos] = value;
        while pos > 1 {
            pos >>= 1;
            self.data[pos] = self.data[pos << 1] + self.data[pos << 1 | 1];
        }
    }

    /// Index of the leaf whose cumulative interval `[C_{j-1}, C_j)` holds `target`.
    ///
    /// Zero-propensity leaves are never returned while the total is positive;
    /// rounding at the right edge falls back to the last positive leaf.
    pub fn select(&self, mut target: f64) -> usize {
        debug_assert!(self.len > 0);
        debug_assert!(target >= 0.0);
        let mut node = 1usize;
        while node < self.leaf_count {
            let left = self.data[node << 1];
            if target < left {
                node <<= 1;
            } else {
                target -= left;
                node = (node << 1) | 1;
            }
        }
        let idx = node - self.leaf_count;
        if idx < self.len && self.leaf(idx) > 0.0 {
            return idx;
        }
        (0..self.len.min(idx + 1))
            .rev()
            .find(|&i| self.leaf(i) > 0.0)
            .unwrap_or(self.len - 1)
    }
}

impl Default for PropensityTree {
    fn default() -> Self {
        Self::new(1)
    }
}
