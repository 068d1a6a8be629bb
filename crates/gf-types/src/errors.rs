use thiserror::Error;

/// Main error type for the genfit system
#[derive(Error, Debug)]
pub enum GfError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Parameter / results table errors
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Table not found: {path}")]
    NotFound { path: String },

    #[error("Table {path} is missing column {column}")]
    MissingColumn { path: String, column: String },

    #[error("Invalid value in {path}, row {row}, column {column}: {message}")]
    InvalidValue {
        path: String,
        row: usize,
        column: String,
        message: String,
    },

    #[error("Table format error in {path}: {message}")]
    Format { path: String, message: String },
}

/// Errors resolving parents of an evolved individual
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Parent model {model_name} not found in parameter history")]
    ParentNotFound { model_name: String },

    #[error("Parent model {model_name} has no value for parameter {parameter}")]
    MissingValue {
        model_name: String,
        parameter: String,
    },

    #[error("Ranking table is empty, nothing to select from")]
    EmptyRanking,
}

/// Message-passing substrate errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Rank {dest} is not addressable from rank {rank} (cluster size {size})")]
    InvalidDestination { rank: usize, dest: usize, size: usize },

    #[error("Channel {channel} closed on rank {rank}")]
    Closed { rank: usize, channel: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Unexpected message on rank {rank}: {message}")]
    UnexpectedMessage { rank: usize, message: String },
}

/// Errors raised while launching or supervising a model run
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to spawn model {model_name}: {message}")]
    SpawnFailed { model_name: String, message: String },

    #[error("Failed to poll worker for {model_name}: {message}")]
    PollFailed { model_name: String, message: String },
}

/// Result type alias for genfit operations
pub type GfResult<T> = Result<T, GfError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::GfError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GfError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::GfError::Config(format!($($arg)*))
    };
}
