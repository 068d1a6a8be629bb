pub mod config;
pub mod errors;
pub mod job;
pub mod population;
pub mod status;

pub use config::*;
pub use errors::*;
pub use job::*;
pub use population::*;
pub use status::*;
