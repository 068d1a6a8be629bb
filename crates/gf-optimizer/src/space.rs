//! Parameter space definitions and sampling primitives.

use gf_types::{config_error, GfError, GfResult, Individual};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

/// Describes how a parameter is sampled and interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Uniform in [min, max].
    Linear,
    /// Uniform in [log10(min), log10(max)], then exponentiated.
    Log,
}

impl FromStr for SamplingMode {
    type Err = GfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            other => Err(config_error!("Unknown mode: {other}")),
        }
    }
}

/// A single parameter dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub mode: SamplingMode,
    pub min: f64,
    pub max: f64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, mode: SamplingMode, min: f64, max: f64) -> GfResult<Self> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(config_error!("invalid parameter name {name:?}"));
        }
        if !(min.is_finite() && max.is_finite()) || min >= max {
            return Err(config_error!(
                "parameter {name}: bounds must satisfy min < max, got [{min}, {max}]"
            ));
        }
        if mode == SamplingMode::Log && min <= 0.0 {
            return Err(config_error!(
                "parameter {name}: log sampling needs positive bounds, got min={min}"
            ));
        }
        Ok(Self { name, mode, min, max })
    }

    pub fn linear(name: impl Into<String>, min: f64, max: f64) -> GfResult<Self> {
        Self::new(name, SamplingMode::Linear, min, max)
    }

    pub fn log(name: impl Into<String>, min: f64, max: f64) -> GfResult<Self> {
        Self::new(name, SamplingMode::Log, min, max)
    }

    /// Draw one value from the parameter's range.
    pub fn sample_range<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let value = match self.mode {
            SamplingMode::Linear => rng.gen_range(self.min..=self.max),
            SamplingMode::Log => {
                let exponent = rng.gen_range(self.min.log10()..=self.max.log10());
                10f64.powf(exponent)
            }
        };
        // powf round-off can step just outside the configured bounds
        value.clamp(self.min, self.max)
    }

    /// Draw `n` independent values from the parameter's range.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.sample_range(rng)).collect()
    }

    /// Blend two parent values: `t = 1` returns `v1`, `t = 0` returns `v2`.
    pub fn interpolate(&self, v1: f64, v2: f64, t: f64) -> f64 {
        if t == 1.0 {
            return v1;
        }
        if t == 0.0 {
            return v2;
        }
        let value = match self.mode {
            SamplingMode::Linear => v1 * t + v2 * (1.0 - t),
            SamplingMode::Log => 10f64.powf(v1.log10() * t + v2.log10() * (1.0 - t)),
        };
        value.clamp(v1.min(v2), v1.max(v2))
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// The full parameter space: an ordered list of uniquely named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    parameters: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new(parameters: Vec<ParameterSpec>) -> GfResult<Self> {
        if parameters.is_empty() {
            return Err(config_error!("parameter space is empty"));
        }
        let mut seen = HashSet::new();
        for spec in &parameters {
            if !seen.insert(spec.name.as_str()) {
                return Err(config_error!("duplicate parameter name: {}", spec.name));
            }
        }
        Ok(Self { parameters })
    }

    /// Parse the four-column configuration format:
    /// `name mode min max`, one parameter per line.
    pub fn parse(text: &str) -> GfResult<Self> {
        let mut parameters = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split_whitespace().collect();
            let [name, mode, min, max] = columns.as_slice() else {
                return Err(config_error!(
                    "line {}: expected `name mode min max`, got {:?}",
                    line_no + 1,
                    line
                ));
            };
            let bound = |raw: &str| -> GfResult<f64> {
                raw.parse::<f64>()
                    .map_err(|e| config_error!("line {}: bad bound {raw:?}: {e}", line_no + 1))
            };
            parameters.push(ParameterSpec::new(
                *name,
                mode.parse()?,
                bound(*min)?,
                bound(*max)?,
            )?);
        }
        Self::new(parameters)
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> GfResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            config_error!("cannot read parameter file {}: {e}", path.as_ref().display())
        })?;
        Self::parse(&text)
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Draw every parameter independently.
    pub fn sample_values<R: Rng + ?Sized>(&self, rng: &mut R) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .map(|spec| (spec.name.clone(), spec.sample_range(rng)))
            .collect()
    }

    /// True when the individual has every parameter and each lies in bounds.
    pub fn admits(&self, individual: &Individual) -> bool {
        self.parameters.iter().all(|spec| {
            individual
                .value(&spec.name)
                .map(|v| spec.contains(v))
                .unwrap_or(false)
        })
    }
}
