//! The model-run contract consumed by the executors.

use gf_types::{CommandSpec, Job};
use std::process::{Command, Stdio};

/// Performs the expensive evaluation of one individual.
///
/// Implementations describe the run as an OS command; the executors own
/// spawning, supervision, and termination. The run's only observable
/// effect is the files it writes under `job.output_dir`.
pub trait Model: Send + Sync {
    /// Command performing `run(parameter_file, output_dir, model_name)`.
    fn command(&self, job: &Job) -> Command;

    /// Human-readable model name for logs.
    fn name(&self) -> &str {
        "model"
    }
}

/// Runs an external program with `{par}`, `{out}`, and `{name}`
/// substituted into its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandModel {
    spec: CommandSpec,
}

impl CommandModel {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// `sh -c <script>` with the placeholders substituted into the script.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(CommandSpec::new("sh", vec!["-c".to_string(), script.into()]))
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

impl Model for CommandModel {
    fn command(&self, job: &Job) -> Command {
        let par = job.parameter_file.to_string_lossy();
        let out = job.output_dir.to_string_lossy();
        let args = self.spec.render_args(&[
            ("par", par.as_ref()),
            ("out", out.as_ref()),
            ("name", job.model_name.as_str()),
        ]);

        let mut command = Command::new(&self.spec.program);
        command.args(args).stdin(Stdio::null());
        command
    }

    fn name(&self) -> &str {
        &self.spec.program
    }
}
