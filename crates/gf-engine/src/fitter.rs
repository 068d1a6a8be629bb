//! Scoring collaborator invoked once per generation.

use async_trait::async_trait;
use gf_types::{internal_error, CommandSpec, GfResult};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Scores every model in `models_dir`, writing a results table with at
/// least `model_name` and a fitness column to `results_path`.
#[async_trait]
pub trait Fitter: Send + Sync {
    async fn run(&self, models_dir: &Path, results_path: &Path, plots_dir: &Path) -> GfResult<()>;
}

/// Runs an external program with `{models}`, `{results}`, and `{plots}`
/// substituted into its arguments.
#[derive(Debug, Clone)]
pub struct CommandFitter {
    spec: CommandSpec,
}

impl CommandFitter {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Fitter for CommandFitter {
    async fn run(&self, models_dir: &Path, results_path: &Path, plots_dir: &Path) -> GfResult<()> {
        let models = models_dir.to_string_lossy();
        let results = results_path.to_string_lossy();
        let plots = plots_dir.to_string_lossy();
        let args = self.spec.render_args(&[
            ("models", models.as_ref()),
            ("results", results.as_ref()),
            ("plots", plots.as_ref()),
        ]);

        info!(program = %self.spec.program, models = %models, "running fitter");
        let status = Command::new(&self.spec.program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| internal_error!("failed to start fitter {}: {e}", self.spec.program))?;

        if !status.success() {
            return Err(internal_error!(
                "fitter {} exited with {status}",
                self.spec.program
            ));
        }
        Ok(())
    }
}
