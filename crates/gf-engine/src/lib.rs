//! # gf-engine
//!
//! Runs generations of a genetic model-fitting search: lays out each
//! generation on disk, samples or breeds its individuals, renders their
//! parameter files, hands them to an executor, and scores the results.

pub mod controller;
pub mod fitter;
pub mod layout;
pub mod render;
pub mod store;

pub use controller::{GenerationController, GenerationSummary};
pub use fitter::{CommandFitter, Fitter};
pub use layout::{prepare_output_root, GenerationLayout};
pub use render::{FirstTokenParser, Interpreter, Parser, TemplateRenderer};
pub use store::{write_lineage_log, write_sampling, CsvTableStore, TableStore};
