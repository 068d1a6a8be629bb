//! Offspring generation by crossover and mutation.

use gf_types::{
    config_error, model_name, GfResult, Individual, Lineage, LineageError, RankingTable,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::selector::TournamentSelector;
use crate::space::ParameterSpace;

/// The new individuals of one generation plus the diagnostics produced
/// while breeding them.
#[derive(Debug, Clone, PartialEq)]
pub struct Offspring {
    pub generation: usize,
    pub individuals: Vec<Individual>,
    /// One entry per evolved child, in creation order. Empty for
    /// generation 1.
    pub lineage: Vec<Lineage>,
    /// Every pool index the selector returned, in draw order.
    pub selected: Vec<usize>,
    pub mutations: usize,
    pub crossovers: usize,
}

/// Pool the ranking tables of earlier generations and keep the best
/// `n_models` rows.
pub fn selection_pool(
    tables: impl IntoIterator<Item = RankingTable>,
    n_models: usize,
) -> RankingTable {
    let mut pool = RankingTable::default();
    for table in tables {
        pool.append(table);
    }
    pool.truncate(n_models);
    pool
}

/// Produces candidate parameter vectors for each generation.
#[derive(Debug, Clone)]
pub struct Evolver<R: Rng = ChaCha8Rng> {
    space: ParameterSpace,
    selector: TournamentSelector,
    fraction_mutation: f64,
    rng: R,
}

impl Evolver<ChaCha8Rng> {
    /// Evolver with a ChaCha source, seeded when `seed` is given and from
    /// OS entropy otherwise.
    pub fn seeded(
        space: ParameterSpace,
        selector: TournamentSelector,
        fraction_mutation: f64,
        seed: Option<u64>,
    ) -> GfResult<Self> {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::new(space, selector, fraction_mutation, rng)
    }
}

impl<R: Rng> Evolver<R> {
    pub fn new(
        space: ParameterSpace,
        selector: TournamentSelector,
        fraction_mutation: f64,
        rng: R,
    ) -> GfResult<Self> {
        if !(0.0..=1.0).contains(&fraction_mutation) {
            return Err(config_error!(
                "fraction_mutation must lie in [0, 1], got {fraction_mutation}"
            ));
        }
        Ok(Self {
            space,
            selector,
            fraction_mutation,
            rng,
        })
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn selector(&self) -> &TournamentSelector {
        &self.selector
    }

    /// Generation 1: every parameter of every individual drawn
    /// independently from its range.
    pub fn seed_population(&mut self, n_models: usize) -> Offspring {
        let mut values: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); n_models];
        for spec in self.space.parameters() {
            let column = spec.sample_uniform(&mut self.rng, n_models);
            for (row, value) in values.iter_mut().zip(column) {
                row.insert(spec.name.clone(), value);
            }
        }

        let individuals = values
            .into_iter()
            .enumerate()
            .map(|(i, values)| Individual::new(model_name(1, i), values))
            .collect();

        Offspring {
            generation: 1,
            individuals,
            lineage: Vec::new(),
            selected: Vec::new(),
            mutations: 0,
            crossovers: 0,
        }
    }

    /// Breed `n_output` children for `generation` from the selection pool.
    ///
    /// `pool` must already be sorted and truncated (see [`selection_pool`]);
    /// `history` holds the parameter rows of every earlier generation.
    pub fn evolve(
        &mut self,
        generation: usize,
        n_output: usize,
        pool: &RankingTable,
        history: &[Individual],
    ) -> GfResult<Offspring> {
        if pool.is_empty() {
            return Err(LineageError::EmptyRanking.into());
        }
        let by_name: HashMap<&str, &Individual> = history
            .iter()
            .map(|ind| (ind.model_name.as_str(), ind))
            .collect();
        let fitness = pool.fitness();

        let mut offspring = Offspring {
            generation,
            individuals: Vec::with_capacity(n_output),
            lineage: Vec::with_capacity(n_output),
            selected: Vec::new(),
            mutations: 0,
            crossovers: 0,
        };

        for i in 0..n_output {
            let child_name = model_name(generation, i);

            if self.rng.gen::<f64>() > self.fraction_mutation {
                let picks = self.selector.select(&fitness, 2, &mut self.rng)?;
                let (m1, m2) = (pool_name(pool, picks[0])?, pool_name(pool, picks[1])?);
                let parent1 = lookup(&by_name, m1)?;
                let parent2 = lookup(&by_name, m2)?;

                let child = self.crossover(&child_name, parent1, parent2)?;
                debug!(child = %child_name, parent1 = %m1, parent2 = %m2, "crossover");

                offspring.selected.extend_from_slice(&picks);
                offspring.lineage.push(Lineage::Crossover {
                    child: child_name,
                    parents: (m1.to_string(), m2.to_string()),
                });
                offspring.individuals.push(child);
                offspring.crossovers += 1;
            } else {
                let picks = self.selector.select(&fitness, 1, &mut self.rng)?;
                let m1 = pool_name(pool, picks[0])?;
                let parent = lookup(&by_name, m1)?;

                let (child, parameter) = self.mutate(&child_name, parent)?;
                debug!(child = %child_name, parent = %m1, parameter = %parameter, "mutation");

                offspring.selected.extend_from_slice(&picks);
                offspring.lineage.push(Lineage::Mutation {
                    child: child_name,
                    parent: m1.to_string(),
                    parameter,
                });
                offspring.individuals.push(child);
                offspring.mutations += 1;
            }
        }

        info!(
            generation,
            mutations = offspring.mutations,
            crossovers = offspring.crossovers,
            "bred offspring"
        );
        Ok(offspring)
    }

    /// Interpolate every parameter between two parents with an independent
    /// blend factor per parameter.
    pub fn crossover(
        &mut self,
        child_name: &str,
        parent1: &Individual,
        parent2: &Individual,
    ) -> GfResult<Individual> {
        let mut values = BTreeMap::new();
        for spec in self.space.parameters() {
            let v1 = parent_value(parent1, &spec.name)?;
            let v2 = parent_value(parent2, &spec.name)?;
            let xi: f64 = self.rng.gen_range(0.0..=1.0);
            values.insert(spec.name.clone(), spec.interpolate(v1, v2, xi));
        }
        Ok(Individual::new(child_name, values))
    }

    /// Copy the parent and redraw exactly one uniformly chosen parameter.
    /// Returns the child and the name of the redrawn parameter.
    pub fn mutate(
        &mut self,
        child_name: &str,
        parent: &Individual,
    ) -> GfResult<(Individual, String)> {
        let mut values = BTreeMap::new();
        for spec in self.space.parameters() {
            values.insert(spec.name.clone(), parent_value(parent, &spec.name)?);
        }

        let spec = self
            .space
            .parameters()
            .choose(&mut self.rng)
            .ok_or_else(|| config_error!("parameter space is empty"))?;
        values.insert(spec.name.clone(), spec.sample_range(&mut self.rng));

        Ok((Individual::new(child_name, values), spec.name.clone()))
    }
}

fn pool_name(pool: &RankingTable, index: usize) -> GfResult<&str> {
    pool.get(index)
        .map(|entry| entry.model_name.as_str())
        .ok_or(LineageError::EmptyRanking.into())
}

fn lookup<'a>(
    by_name: &HashMap<&str, &'a Individual>,
    model_name: &str,
) -> GfResult<&'a Individual> {
    by_name.get(model_name).copied().ok_or_else(|| {
        LineageError::ParentNotFound {
            model_name: model_name.to_string(),
        }
        .into()
    })
}

fn parent_value(parent: &Individual, parameter: &str) -> GfResult<f64> {
    parent.value(parameter).ok_or_else(|| {
        LineageError::MissingValue {
            model_name: parent.model_name.clone(),
            parameter: parameter.to_string(),
        }
        .into()
    })
}
