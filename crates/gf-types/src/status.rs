//! Run lifecycle tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::population::RankingEntry;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Per-generation state machine: INIT -> SAMPLE -> RENDER -> EXECUTE -> SCORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationPhase {
    Init,
    Sample,
    Render,
    Execute,
    Score,
}

impl GenerationPhase {
    /// The phase that follows this one. `Score` wraps to `Init` of the next
    /// generation.
    pub fn next(self) -> Self {
        match self {
            Self::Init => Self::Sample,
            Self::Sample => Self::Render,
            Self::Render => Self::Execute,
            Self::Execute => Self::Score,
            Self::Score => Self::Init,
        }
    }

    /// Whether only the coordinating party performs this phase.
    pub fn coordinator_only(self) -> bool {
        !matches!(self, Self::Execute)
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Sample => "sample",
            Self::Render => "render",
            Self::Execute => "execute",
            Self::Score => "score",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub name: String,
    pub state: RunState,
    pub generation: usize,
    pub phase: GenerationPhase,
    pub generations_completed: usize,
    pub best: Option<RankingEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: RunState::Pending,
            generation: 0,
            phase: GenerationPhase::Init,
            generations_completed: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn enter(&mut self, generation: usize, phase: GenerationPhase) {
        self.generation = generation;
        self.phase = phase;
    }

    pub fn finish_generation(&mut self) {
        self.generations_completed += 1;
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Replace the best entry if `candidate` has lower fitness.
    pub fn update_best(&mut self, candidate: &RankingEntry) {
        let improves = match &self.best {
            None => true,
            Some(current) => candidate.fitness < current.fitness,
        };
        if improves {
            self.best = Some(candidate.clone());
        }
    }
}
