//! # gf-optimizer
//!
//! Genetic search over mixed linear/logarithmic parameter spaces.
//!
//! Provides parameter space definitions and sampling, rank-biased tournament
//! selection, and the crossover/mutation breeding step that produces each
//! generation's new individuals.

mod evolver;
mod selector;
mod space;

pub use evolver::{selection_pool, Evolver, Offspring};
pub use selector::TournamentSelector;
pub use space::{ParameterSpace, ParameterSpec, SamplingMode};
