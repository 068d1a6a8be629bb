//! Materializing per-individual parameter files from a template.

use gf_types::{validation_error, GfResult, Individual};
use std::fs;
use std::path::Path;

/// Identifies the parameter a templated line refers to.
pub trait Parser: Send + Sync {
    fn parameter_name(&self, line: &str) -> GfResult<String>;
}

/// Resolves the value written for a parameter, for instance when several
/// parameters are correlated.
pub trait Interpreter: Send + Sync {
    fn resolve(&self, generation: usize, parameter: &str, individual: &Individual)
        -> GfResult<f64>;
}

/// The parameter name is the first whitespace-separated token of the line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstTokenParser;

impl Parser for FirstTokenParser {
    fn parameter_name(&self, line: &str) -> GfResult<String> {
        line.split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| validation_error!("templated line has no parameter name: {line:?}"))
    }
}

pub struct TemplateRenderer {
    lines: Vec<String>,
    placeholder: String,
    parser: Box<dyn Parser>,
    interpreter: Option<Box<dyn Interpreter>>,
}

impl TemplateRenderer {
    pub fn new(
        template: impl Into<String>,
        placeholder: impl Into<String>,
        parser: Box<dyn Parser>,
    ) -> Self {
        Self {
            lines: template.into().split_inclusive('\n').map(str::to_string).collect(),
            placeholder: placeholder.into(),
            parser,
            interpreter: None,
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        placeholder: impl Into<String>,
        parser: Box<dyn Parser>,
    ) -> GfResult<Self> {
        Ok(Self::new(fs::read_to_string(path)?, placeholder, parser))
    }

    pub fn with_interpreter(mut self, interpreter: Box<dyn Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Render the template for one individual. Lines without the
    /// placeholder are copied verbatim.
    pub fn render(&self, generation: usize, individual: &Individual) -> GfResult<String> {
        let mut out = String::new();
        for line in &self.lines {
            if !line.contains(&self.placeholder) {
                out.push_str(line);
                continue;
            }
            let name = self.parser.parameter_name(line)?;
            let value = match &self.interpreter {
                Some(interpreter) => interpreter.resolve(generation, &name, individual)?,
                None => individual.value(&name).ok_or_else(|| {
                    validation_error!(
                        "template refers to {name}, which {} does not define",
                        individual.model_name
                    )
                })?,
            };
            out.push_str(&line.replace(&self.placeholder, &value.to_string()));
        }
        Ok(out)
    }

    pub fn render_to(
        &self,
        path: &Path,
        generation: usize,
        individual: &Individual,
    ) -> GfResult<()> {
        fs::write(path, self.render(generation, individual)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("lines", &self.lines.len())
            .field("placeholder", &self.placeholder)
            .field("interpreter", &self.interpreter.is_some())
            .finish()
    }
}
