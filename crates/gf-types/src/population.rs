//! Individuals, ranking tables, and lineage records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Build the canonical model name for individual `index` of `generation`.
pub fn model_name(generation: usize, index: usize) -> String {
    format!("g{generation}_{index}")
}

/// One candidate parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// Unique within a generation (`g<gen>_<idx>`).
    pub model_name: String,
    pub values: BTreeMap<String, f64>,
}

impl Individual {
    pub fn new(model_name: impl Into<String>, values: BTreeMap<String, f64>) -> Self {
        Self {
            model_name: model_name.into(),
            values,
        }
    }

    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.values.get(parameter).copied()
    }
}

/// A scored model: one row of a fitting-results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub model_name: String,
    /// Lower is better.
    pub fitness: f64,
}

impl RankingEntry {
    pub fn new(model_name: impl Into<String>, fitness: f64) -> Self {
        Self {
            model_name: model_name.into(),
            fitness,
        }
    }
}

/// Fitness table kept sorted ascending (best first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingTable {
    entries: Vec<RankingEntry>,
}

impl RankingTable {
    pub fn new(entries: Vec<RankingEntry>) -> Self {
        let mut table = Self { entries };
        table.sort();
        table
    }

    /// Append the rows of another generation and restore ordering.
    pub fn append(&mut self, other: RankingTable) {
        self.entries.extend(other.entries);
        self.sort();
    }

    /// Keep only the `n` best rows.
    pub fn truncate(&mut self, n: usize) {
        self.entries.truncate(n);
    }

    pub fn entries(&self) -> &[RankingEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&RankingEntry> {
        self.entries.get(index)
    }

    pub fn best(&self) -> Option<&RankingEntry> {
        self.entries.first()
    }

    pub fn fitness(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.fitness).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Stable sort: ties keep insertion (generation) order.
    fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
    }
}

/// How an evolved individual came to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lineage {
    Crossover {
        child: String,
        parents: (String, String),
    },
    Mutation {
        child: String,
        parent: String,
        parameter: String,
    },
}

impl Lineage {
    pub fn child(&self) -> &str {
        match self {
            Self::Crossover { child, .. } | Self::Mutation { child, .. } => child,
        }
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crossover { child, parents } => {
                write!(f, "{child} = crossover of {} and {}", parents.0, parents.1)
            }
            Self::Mutation {
                child,
                parent,
                parameter,
            } => write!(f, "{child} = mutation of {parent}, parameter={parameter}"),
        }
    }
}
