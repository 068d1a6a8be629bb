//! Run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{config_error, GfResult};

/// Which scheduler executes the model runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Bounded subprocess pool on this machine.
    #[default]
    Local,
    /// Rank-based master/worker protocol over a message transport.
    Distributed,
}

/// Polling cadence of the schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Interval between liveness scans while waiting for a pool slot, and
    /// between probes of the distributed master and worker.
    pub poll_interval_ms: u64,
    /// Interval between liveness scans while draining the local pool.
    pub drain_interval_ms: u64,
    /// Pause after each local spawn.
    pub spawn_stagger_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            drain_interval_ms: 10_000,
            spawn_stagger_ms: 100,
        }
    }
}

impl SchedulingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn spawn_stagger(&self) -> Duration {
        Duration::from_millis(self.spawn_stagger_ms)
    }
}

/// An external program plus templated arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Substitute `{key}` placeholders in every argument.
    pub fn render_args(&self, substitutions: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                substitutions
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| {
                        acc.replace(&format!("{{{key}}}"), value)
                    })
            })
            .collect()
    }
}

/// Top-level configuration for a genetic optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub name: String,

    /// Root directory holding one `g%05d/` namespace per generation.
    pub output_dir: PathBuf,

    /// Template parameter file rendered once per individual.
    pub template: PathBuf,

    /// Parameter configuration file (`name mode min max` per line).
    pub parameters: PathBuf,

    /// Population size of generation 1, and size of the retained pool.
    pub n_models: usize,

    /// Fraction of `n_models` generated anew in every later generation.
    pub fraction_output: f64,

    /// Probability that a child is a mutation rather than a crossover.
    pub fraction_mutation: f64,

    /// Tournament subset size as a fraction of the ranking pool.
    pub k_frac: f64,

    /// Rank-bias decay of the tournament weights.
    pub p: f64,

    /// Maximum concurrent workers in local mode.
    pub n_cores: usize,

    /// Wall-clock budget per model run.
    pub max_time_secs: f64,

    pub mode: ExecutionMode,

    /// Keep an already existing output root instead of creating it.
    pub existing: bool,

    /// Replace a generation directory that already exists.
    pub overwrite: bool,

    /// Seed for the evolver's random source; entropy when absent.
    pub seed: Option<u64>,

    /// Token replaced by parameter values in the template.
    pub placeholder: String,

    pub scheduling: SchedulingConfig,

    pub model: Option<CommandSpec>,
    pub fitter: Option<CommandSpec>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            name: "genfit".to_string(),
            output_dir: PathBuf::from("models"),
            template: PathBuf::from("template.par"),
            parameters: PathBuf::from("parameters.conf"),
            n_models: 100,
            fraction_output: 0.1,
            fraction_mutation: 0.5,
            k_frac: 0.1,
            p: 0.9,
            n_cores: 8,
            max_time_secs: 600.0,
            mode: ExecutionMode::Local,
            existing: false,
            overwrite: false,
            seed: None,
            placeholder: "VAR".to_string(),
            scheduling: SchedulingConfig::default(),
            model: None,
            fitter: None,
        }
    }
}

impl GeneticConfig {
    pub fn new(name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. Paths inside are taken as written.
    pub fn from_json_file(path: impl AsRef<Path>) -> GfResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn with_population(mut self, n_models: usize) -> Self {
        self.n_models = n_models;
        self
    }

    pub fn with_fractions(mut self, fraction_output: f64, fraction_mutation: f64) -> Self {
        self.fraction_output = fraction_output;
        self.fraction_mutation = fraction_mutation;
        self
    }

    pub fn with_tournament(mut self, k_frac: f64, p: f64) -> Self {
        self.k_frac = k_frac;
        self.p = p;
        self
    }

    pub fn with_cores(mut self, n_cores: usize) -> Self {
        self.n_cores = n_cores;
        self
    }

    pub fn with_max_time(mut self, max_time_secs: f64) -> Self {
        self.max_time_secs = max_time_secs;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_inputs(mut self, template: impl Into<PathBuf>, parameters: impl Into<PathBuf>) -> Self {
        self.template = template.into();
        self.parameters = parameters.into();
        self
    }

    pub fn with_scheduling(mut self, scheduling: SchedulingConfig) -> Self {
        self.scheduling = scheduling;
        self
    }

    pub fn with_commands(mut self, model: CommandSpec, fitter: CommandSpec) -> Self {
        self.model = Some(model);
        self.fitter = Some(fitter);
        self
    }

    /// Per-job wall-clock limit. Values `validate` rejects saturate to
    /// `Duration::MAX`.
    pub fn max_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_time_secs).unwrap_or(Duration::MAX)
    }

    /// New individuals per generation after the first.
    pub fn n_output(&self) -> usize {
        (self.n_models as f64 * self.fraction_output).floor() as usize
    }

    /// Reject settings that could only fail later in the run.
    pub fn validate(&self) -> GfResult<()> {
        if self.n_models == 0 {
            return Err(config_error!("n_models must be at least 1"));
        }
        for (label, value) in [
            ("fraction_output", self.fraction_output),
            ("fraction_mutation", self.fraction_mutation),
            ("k_frac", self.k_frac),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_error!("{label} must lie in [0, 1], got {value}"));
            }
        }
        if self.n_output() == 0 {
            return Err(config_error!(
                "fraction_output {} yields no new models for n_models={}",
                self.fraction_output,
                self.n_models
            ));
        }
        if (self.n_models as f64 * self.k_frac).floor() as usize == 0 {
            return Err(config_error!(
                "k_frac {} is too small for n_models={}",
                self.k_frac,
                self.n_models
            ));
        }
        if !(self.p > 0.0 && self.p <= 1.0) {
            return Err(config_error!("p must lie in (0, 1], got {}", self.p));
        }
        if self.n_cores == 0 {
            return Err(config_error!("n_cores must be at least 1"));
        }
        if !(self.max_time_secs.is_finite() && self.max_time_secs > 0.0) {
            return Err(config_error!(
                "max_time_secs must be positive, got {}",
                self.max_time_secs
            ));
        }
        if Duration::try_from_secs_f64(self.max_time_secs).is_err() {
            return Err(config_error!(
                "max_time_secs {} is too large",
                self.max_time_secs
            ));
        }
        if self.placeholder.is_empty() {
            return Err(config_error!("placeholder must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GfError;

    #[test]
    fn defaults_validate() {
        let config = GeneticConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_output(), 10);
        assert_eq!(config.scheduling.poll_interval(), Duration::from_millis(100));
        assert_eq!(ExecutionMode::default(), ExecutionMode::Local);
    }

    #[test]
    fn k_zero_is_rejected() {
        let config = GeneticConfig::new("small", "/tmp/out")
            .with_population(10)
            .with_tournament(0.05, 0.9);
        match config.validate() {
            Err(GfError::Config(msg)) => assert!(msg.contains("k_frac")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn empty_offspring_is_rejected() {
        let config = GeneticConfig::new("small", "/tmp/out")
            .with_population(5)
            .with_fractions(0.1, 0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_p_and_cores_rejected() {
        let base = GeneticConfig::new("x", "/tmp/out").with_population(10);
        assert!(base.clone().with_tournament(0.2, 0.0).validate().is_err());
        assert!(base.clone().with_tournament(0.2, 1.5).validate().is_err());
        assert!(base.clone().with_cores(0).validate().is_err());
        assert!(base.with_max_time(0.0).validate().is_err());
    }

    #[test]
    fn unrepresentable_max_time_rejected() {
        let config = GeneticConfig::new("x", "/tmp/out")
            .with_population(10)
            .with_max_time(1e20);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GfError::Config(ref msg) if msg.contains("too large")));
        assert_eq!(config.max_time(), Duration::MAX);

        let config = config.with_max_time(1.5);
        config.validate().unwrap();
        assert_eq!(config.max_time(), Duration::from_millis(1500));
    }

    #[test]
    fn json_round_trip_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "name": "sed",
                "output_dir": "/data/run",
                "n_models": 10,
                "mode": "distributed",
                "model": {"program": "run_model", "args": ["{par}", "{out}", "{name}"]}
            }"#,
        )
        .unwrap();

        let config = GeneticConfig::from_json_file(&path).unwrap();
        assert_eq!(config.name, "sed");
        assert_eq!(config.mode, ExecutionMode::Distributed);
        assert_eq!(config.fraction_mutation, 0.5);
        assert_eq!(config.scheduling.drain_interval_ms, 10_000);
        let model = config.model.unwrap();
        assert_eq!(
            model.render_args(&[("par", "a.par"), ("out", "models/"), ("name", "g1_0")]),
            vec!["a.par", "models/", "g1_0"]
        );
    }
}
