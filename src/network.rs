//! Immutable description of a well-mixed reaction network.
//!
//! A network is declared with [`NetworkSpec`] (species with initial copy
//! numbers plus an ordered list of [`ReactionSpec`]s) and compiled into a
//! validated [`ReactionNetwork`]. Compilation resolves species names to
//! indices, merges repeated terms, computes the sparse net stoichiometry of
//! every reaction and the reaction dependency graph used by the exact stepper.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Reserved token for "no species" in source and sink reactions.
pub const NULL_SPECIES: &str = "null";

/// One `coefficient · species` term on either side of a reaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub species: String,
    pub coefficient: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSpec {
    pub name: String,
    pub initial: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReactionSpec {
    pub name: String,
    pub rate: f64,
    #[serde(default)]
    pub reactants: Vec<Term>,
    #[serde(default)]
    pub products: Vec<Term>,
}

impl ReactionSpec {
    pub fn new(name: impl Into<String>, rate: f64) -> Self {
        Self {
            name: name.into(),
            rate,
            reactants: Vec::new(),
            products: Vec::new(),
        }
    }

    pub fn reactant(mut self, species: impl Into<String>, coefficient: u32) -> Self {
        self.reactants.push(Term {
            species: species.into(),
            coefficient,
        });
        self
    }

    pub fn product(mut self, species: impl Into<String>, coefficient: u32) -> Self {
        self.products.push(Term {
            species: species.into(),
            coefficient,
        });
        self
    }

    /// Parses a reaction from chemical notation such as `"2 A + B -> C"`.
    ///
    /// Either side may be empty or the null token (`"null -> A"`).
    /// Coefficients default to 1 and may be written `2 A` or `2A`.
    pub fn from_equation(
        name: impl Into<String>,
        rate: f64,
        equation: &str,
    ) -> Result<Self, SimError> {
        let name = name.into();
        let (lhs, rhs) = equation.split_once("->").ok_or_else(|| {
            SimError::InvalidNetwork(format!(
                "reaction '{}' equation '{}' is missing '->'",
                name, equation
            ))
        })?;
        let reactants = parse_side(&name, lhs)?;
        let products = parse_side(&name, rhs)?;
        Ok(Self {
            name,
            rate,
            reactants,
            products,
        })
    }
}

fn parse_side(reaction: &str, side: &str) -> Result<Vec<Term>, SimError> {
    let mut terms = Vec::new();
    let side = side.trim();
    if side.is_empty() {
        return Ok(terms);
    }
    for raw in side.split('+') {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SimError::InvalidNetwork(format!(
                "reaction '{}' has an empty term",
                reaction
            )));
        }
        let digits_end = raw
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit())
            .map(|(idx, _)| idx)
            .unwrap_or(raw.len());
        let (digits, species) = raw.split_at(digits_end);
        let species = species.trim();
        if species.is_empty() {
            // A bare number is only meaningful as the null token "0".
            if digits == "0" {
                continue;
            }
            return Err(SimError::InvalidNetwork(format!(
                "reaction '{}' term '{}' names no species",
                reaction, raw
            )));
        }
        let coefficient = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().map_err(|_| {
                SimError::InvalidNetwork(format!(
                    "reaction '{}' term '{}' has an invalid coefficient",
                    reaction, raw
                ))
            })?
        };
        if species.contains(char::is_whitespace) {
            return Err(SimError::InvalidNetwork(format!(
                "reaction '{}' term '{}' is not a single species token",
                reaction, raw
            )));
        }
        terms.push(Term {
            species: species.to_string(),
            coefficient,
        });
    }
    Ok(terms)
}

/// Declarative network input: species table plus ordered reactions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub species: Vec<SpeciesSpec>,
    pub reactions: Vec<ReactionSpec>,
}

impl NetworkSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn species(mut self, name: impl Into<String>, initial: u64) -> Self {
        self.species.push(SpeciesSpec {
            name: name.into(),
            initial,
        });
        self
    }

    pub fn reaction(mut self, reaction: ReactionSpec) -> Self {
        self.reactions.push(reaction);
        self
    }

    pub fn build(self) -> Result<ReactionNetwork, SimError> {
        ReactionNetwork::new(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Reactant {
    pub(crate) species: usize,
    pub(crate) count: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeciesDelta {
    pub species: usize,
    pub delta: i64,
}

#[derive(Clone, Debug)]
pub struct Reaction {
    pub(crate) name: String,
    pub(crate) rate_constant: f64,
    pub(crate) reactants: Vec<Reactant>,
}

impl Reaction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_constant(&self) -> f64 {
        self.rate_constant
    }

    /// Reactant requirements as `(species index, coefficient)` pairs.
    pub fn reactants(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.reactants.iter().map(|r| (r.species, r.count))
    }
}

/// Validated, immutable reaction network.
#[derive(Clone, Debug)]
pub struct ReactionNetwork {
    species: Vec<String>,
    species_index: HashMap<String, usize>,
    initial_state: Vec<i64>,
    reactions: Vec<Reaction>,
    reaction_deltas: Vec<Vec<SpeciesDelta>>,
    dependencies: Vec<Vec<usize>>,
}

impl ReactionNetwork {
    pub fn builder() -> NetworkSpec {
        NetworkSpec::new()
    }

    /// Resolves and validates `spec`.
    ///
    /// At least one species is required. A network without reactions is valid;
    /// its cells are frozen from the start and only grow and divide.
    pub fn new(spec: NetworkSpec) -> Result<Self, SimError> {
        if spec.species.is_empty() {
            return Err(SimError::InvalidNetwork(
                "network must declare at least one species".into(),
            ));
        }
        let mut species = Vec::with_capacity(spec.species.len());
        let mut species_index = HashMap::with_capacity(spec.species.len());
        let mut initial_state = Vec::with_capacity(spec.species.len());
        for entry in spec.species {
            if entry.name.is_empty() || entry.name.contains(char::is_whitespace) {
                return Err(SimError::InvalidNetwork(format!(
                    "species name '{}' must be a non-empty token",
                    entry.name
                )));
            }
            if entry.name == NULL_SPECIES {
                return Err(SimError::InvalidNetwork(format!(
                    "'{}' is reserved for the null species",
                    NULL_SPECIES
                )));
            }
            let initial = i64::try_from(entry.initial).map_err(|_| {
                SimError::InvalidNetwork(format!(
                    "species '{}' initial count {} is too large",
                    entry.name, entry.initial
                ))
            })?;
            if species_index
                .insert(entry.name.clone(), species.len())
                .is_some()
            {
                return Err(SimError::InvalidNetwork(format!(
                    "species '{}' is declared more than once",
                    entry.name
                )));
            }
            species.push(entry.name);
            initial_state.push(initial);
        }

        let n_species = species.len();
        let mut seen_names: HashMap<&str, usize> = HashMap::new();
        let mut reactions = Vec::with_capacity(spec.reactions.len());
        let mut reaction_deltas = Vec::with_capacity(spec.reactions.len());
        for (idx, reaction) in spec.reactions.iter().enumerate() {
            if reaction.name.is_empty() {
                return Err(SimError::InvalidNetwork(format!(
                    "reaction {} has an empty name",
                    idx
                )));
            }
            if seen_names.insert(&reaction.name, idx).is_some() {
                return Err(SimError::InvalidNetwork(format!(
                    "reaction name '{}' is used more than once",
                    reaction.name
                )));
            }
            if !reaction.rate.is_finite() || reaction.rate < 0.0 {
                return Err(SimError::InvalidNetwork(format!(
                    "reaction '{}' rate constant {} must be finite and non-negative",
                    reaction.name, reaction.rate
                )));
            }
            let consumed = resolve_terms(&reaction.name, &reaction.reactants, &species_index, n_species)?;
            let produced = resolve_terms(&reaction.name, &reaction.products, &species_index, n_species)?;

            let reactants = consumed
                .iter()
                .enumerate()
                .filter_map(|(species, &count)| (count > 0).then_some(Reactant { species, count }))
                .collect();
            let deltas = consumed
                .iter()
                .zip(produced.iter())
                .enumerate()
                .filter_map(|(species, (&used, &made))| {
                    let delta = made - used;
                    (delta != 0).then_some(SpeciesDelta { species, delta })
                })
                .collect();
            reactions.push(Reaction {
                name: reaction.name.clone(),
                rate_constant: reaction.rate,
                reactants,
            });
            reaction_deltas.push(deltas);
        }

        let dependencies = build_dependency_graph(n_species, &reaction_deltas, &reactions);
        Ok(Self {
            species,
            species_index,
            initial_state,
            reactions,
            reaction_deltas,
            dependencies,
        })
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn n_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn species_names(&self) -> &[String] {
        &self.species
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species_index.get(name).copied()
    }

    pub fn reaction_index(&self, name: &str) -> Option<usize> {
        self.reactions.iter().position(|r| r.name == name)
    }

    pub fn initial_state(&self) -> &[i64] {
        &self.initial_state
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn rate_constant(&self, reaction: usize) -> f64 {
        self.reactions[reaction].rate_constant
    }

    /// Sparse net change (products − reactants) of one firing.
    pub fn deltas(&self, reaction: usize) -> &[SpeciesDelta] {
        &self.reaction_deltas[reaction]
    }

    /// Dense net change vector of one firing, indexed by species.
    pub fn stoichiometry(&self, reaction: usize) -> Vec<i64> {
        let mut dense = vec![0; self.n_species()];
        for delta in &self.reaction_deltas[reaction] {
            dense[delta.species] = delta.delta;
        }
        dense
    }

    /// Reactions whose propensity may change after `reaction` fires.
    pub(crate) fn dependents(&self, reaction: usize) -> &[usize] {
        &self.dependencies[reaction]
    }
}

fn resolve_terms(
    reaction: &str,
    terms: &[Term],
    species_index: &HashMap<String, usize>,
    n_species: usize,
) -> Result<Vec<i64>, SimError> {
    let mut totals = vec![0i64; n_species];
    for term in terms {
        if term.species == NULL_SPECIES {
            continue;
        }
        if term.coefficient == 0 {
            return Err(SimError::InvalidNetwork(format!(
                "reaction '{}' term '{}' has a zero coefficient",
                reaction, term.species
            )));
        }
        let species = species_index.get(&term.species).ok_or_else(|| {
            SimError::InvalidNetwork(format!(
                "reaction '{}' references undeclared species '{}'",
                reaction, term.species
            ))
        })?;
        totals[*species] += i64::from(term.coefficient);
    }
    Ok(totals)
}

fn build_dependency_graph(
    n_species: usize,
    reaction_deltas: &[Vec<SpeciesDelta>],
    reactions: &[Reaction],
) -> Vec<Vec<usize>> {
    let mut species_dependents: Vec<Vec<usize>> = vec![Vec::new(); n_species];
    for (idx, reaction) in reactions.iter().enumerate() {
        for reactant in &reaction.reactants {
            species_dependents[reactant.species].push(idx);
        }
    }

    let mut dependencies = vec![Vec::new(); reactions.len()];
    let mut visit_markers = vec![usize::MAX; reactions.len()];
    for (r, deps) in dependencies.iter_mut().enumerate() {
        visit_markers[r] = r;
        deps.push(r);
        for delta in &reaction_deltas[r] {
            for &dep in &species_dependents[delta.species] {
                if visit_markers[dep] != r {
                    visit_markers[dep] = r;
                    deps.push(dep);
                }
            }
        }
    }
    dependencies
}
