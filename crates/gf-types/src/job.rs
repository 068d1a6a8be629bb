//! Job descriptors and execution outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One model run to execute: an individual's parameter file and its
/// output location.
///
/// Serializable so it can be shipped to a remote worker rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub model_name: String,
    pub parameter_file: PathBuf,
    pub output_dir: PathBuf,
}

impl Job {
    pub fn new(
        model_name: impl Into<String>,
        parameter_file: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            parameter_file: parameter_file.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Derive a job from a `<model>.par` file path. The model name is the
    /// file stem up to the first dot.
    pub fn from_parameter_file(
        parameter_file: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Option<Self> {
        let parameter_file = parameter_file.into();
        let file_name = parameter_file.file_name()?.to_str()?;
        let model_name = file_name.split('.').next()?.to_string();
        if model_name.is_empty() {
            return None;
        }
        Some(Self {
            model_name,
            parameter_file,
            output_dir: output_dir.into(),
        })
    }
}

/// Terminal state of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Completed,
    /// Exit code, if the process exited normally.
    Failed(Option<i32>),
    TimedOut,
    SpawnFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub model_name: String,
    pub status: JobStatus,
    pub elapsed: Duration,
}

/// What one rank observed during an EXECUTE phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Outcomes of the jobs this rank ran itself.
    pub outcomes: Vec<JobOutcome>,
    /// Highest number of simultaneously active workers (local pool only).
    pub peak_active: usize,
    /// Dispatch log on the distributed master: model name -> rank, in
    /// assignment order.
    pub assignments: Vec<(String, usize)>,
    /// Stop sentinels received (distributed worker ranks only).
    pub stops_received: usize,
}

impl ExecutionReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    pub fn timed_out(&self) -> usize {
        self.count(JobStatus::TimedOut)
    }

    /// Number of jobs dispatched to each worker rank.
    pub fn assignments_per_rank(&self) -> BTreeMap<usize, usize> {
        let mut per_rank = BTreeMap::new();
        for (_, rank) in &self.assignments {
            *per_rank.entry(*rank).or_insert(0) += 1;
        }
        per_rank
    }
}
