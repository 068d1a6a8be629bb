//! On-disk layout of a run and of each generation within it.

use gf_types::{config_error, GfResult, Job};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Prepare the run's output root. Without `existing`, a root that is
/// already present is only replaced when `overwrite` is set.
pub fn prepare_output_root(root: &Path, existing: bool, overwrite: bool) -> GfResult<()> {
    if root.exists() && !existing {
        if !overwrite {
            return Err(config_error!(
                "output directory {} already exists (set existing or overwrite)",
                root.display()
            ));
        }
        warn!(dir = %root.display(), "replacing existing output directory");
        fs::remove_dir_all(root)?;
    }
    fs::create_dir_all(root)?;
    Ok(())
}

/// Paths of one generation's namespace, `<root>/gNNNNN/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationLayout {
    generation: usize,
    dir: PathBuf,
}

impl GenerationLayout {
    pub fn new(output_root: impl AsRef<Path>, generation: usize) -> Self {
        Self {
            generation,
            dir: output_root.as_ref().join(Self::dir_name(generation)),
        }
    }

    pub fn dir_name(generation: usize) -> String {
        format!("g{generation:05}")
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn par_dir(&self) -> PathBuf {
        self.dir.join("par")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.dir.join("models")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.dir.join("plots")
    }

    pub fn parameter_table(&self) -> PathBuf {
        self.dir.join("parameters.csv")
    }

    pub fn results_table(&self) -> PathBuf {
        self.dir.join("fitting_output.csv")
    }

    pub fn lineage_log(&self) -> PathBuf {
        self.dir.join("parameters.log")
    }

    pub fn sampling_file(&self) -> PathBuf {
        self.dir.join("sampling.csv")
    }

    pub fn parameter_file(&self, model_name: &str) -> PathBuf {
        self.par_dir().join(format!("{model_name}.par"))
    }

    /// Create the generation directory and its `par/`, `models/`, and
    /// `plots/` subdirectories.
    pub fn create(&self, overwrite: bool) -> GfResult<()> {
        if self.dir.exists() {
            if !overwrite {
                return Err(config_error!(
                    "generation directory {} already exists",
                    self.dir.display()
                ));
            }
            warn!(dir = %self.dir.display(), "replacing existing generation directory");
            fs::remove_dir_all(&self.dir)?;
        }
        for dir in [self.par_dir(), self.models_dir(), self.plots_dir()] {
            fs::create_dir_all(dir)?;
        }
        info!(generation = self.generation, dir = %self.dir.display(), "initialized generation");
        Ok(())
    }

    /// `par/*.par`, sorted by file name.
    pub fn parameter_files(&self) -> GfResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.par_dir())? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "par") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// One job per parameter file, in listing order.
    pub fn jobs(&self) -> GfResult<Vec<Job>> {
        let models = self.models_dir();
        Ok(self
            .parameter_files()?
            .into_iter()
            .filter_map(|path| Job::from_parameter_file(path, &models))
            .collect())
    }
}
