use crate::error::SimError;
use crate::network::ReactionNetwork;
use crate::propensity::{PropensityTree, recompute_propensities};

/// Copy numbers of one cell together with its cached propensities.
///
/// Counts change only through [`fire`](Self::fire) and
/// [`replace_counts`](Self::replace_counts); both keep the propensity cache
/// consistent with the counts.
#[derive(Clone, Debug)]
pub struct ChemicalState {
    counts: Vec<i64>,
    propensities: Vec<f64>,
    tree: PropensityTree,
}

impl ChemicalState {
    pub fn new(network: &ReactionNetwork, counts: Vec<i64>) -> Result<Self, SimError> {
        if counts.len() != network.n_species() {
            return Err(SimError::InvalidArgument(format!(
                "state length {} does not match number of species {}",
                counts.len(),
                network.n_species()
            )));
        }
        if let Some(species) = counts.iter().position(|&c| c < 0) {
            return Err(SimError::InvalidArgument(format!(
                "species {} has negative count {}",
                species, counts[species]
            )));
        }
        let mut state = Self {
            counts,
            propensities: vec![0.0; network.n_reactions()],
            tree: PropensityTree::new(network.n_reactions()),
        };
        state.refresh(network);
        Ok(state)
    }

    pub fn initial(network: &ReactionNetwork) -> Result<Self, SimError> {
        Self::new(network, network.initial_state().to_vec())
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn propensities(&self) -> &[f64] {
        &self.propensities
    }

    pub fn total_propensity(&self) -> f64 {
        self.tree.total()
    }

    /// Reaction whose cumulative propensity interval contains `target`.
    pub fn select(&self, target: f64) -> usize {
        self.tree.select(target)
    }

    /// Applies one firing of `reaction` and refreshes the dependent propensities.
    pub fn fire(&mut self, network: &ReactionNetwork, reaction: usize) {
        for delta in network.deltas(reaction) {
            self.counts[delta.species] += delta.delta;
            debug_assert!(self.counts[delta.species] >= 0);
        }
        let reactions = network.reactions();
        for &dep in network.dependents(reaction) {
            let value = reactions[dep].propensity(&self.counts);
            self.propensities[dep] = value;
            self.tree.update(dep, value);
        }
    }

    /// Counts that would result from firing each reaction `firings[j]` times.
    ///
    /// Fails with [`SimError::InvalidArgument`] if a count leaves the `i64` range.
    pub fn project(&self, network: &ReactionNetwork, firings: &[u64]) -> Result<Vec<i64>, SimError> {
        let mut next = self.counts.clone();
        for (reaction, &k) in firings.iter().enumerate() {
            if k == 0 {
                continue;
            }
            for delta in network.deltas(reaction) {
                let change = i64::try_from(k)
                    .ok()
                    .and_then(|k| delta.delta.checked_mul(k));
                next[delta.species] = change
                    .and_then(|change| next[delta.species].checked_add(change))
                    .ok_or_else(|| {
                        SimError::InvalidArgument(format!(
                            "{} firings of reaction {} overflow the count of species {}",
                            k, reaction, delta.species
                        ))
                    })?;
            }
        }
        Ok(next)
    }

    /// Replaces the counts wholesale, e.g. after an accepted leap.
    pub fn replace_counts(&mut self, network: &ReactionNetwork, counts: Vec<i64>) {
        debug_assert_eq!(counts.len(), self.counts.len());
        debug_assert!(counts.iter().all(|&c| c >= 0));
        self.counts = counts;
        self.refresh(network);
    }

    fn refresh(&mut self, network: &ReactionNetwork) {
        recompute_propensities(network.reactions(), &self.counts, &mut self.propensities);
        self.tree.rebuild(&self.propensities);
    }
}
