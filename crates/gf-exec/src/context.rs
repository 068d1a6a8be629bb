//! Where this process sits in the run: its rank and how to reach peers.

use gf_types::{config_error, GfResult};
use std::sync::Arc;

use crate::transport::Transport;

/// Rank, cluster size, and transport for the current process.
///
/// A single-process run is rank 0 of 1 with no transport.
#[derive(Clone)]
pub struct ExecutionContext {
    rank: usize,
    size: usize,
    transport: Option<Arc<dyn Transport>>,
}

impl ExecutionContext {
    pub fn single() -> Self {
        Self {
            rank: 0,
            size: 1,
            transport: None,
        }
    }

    pub fn distributed(transport: Arc<dyn Transport>) -> GfResult<Self> {
        let size = transport.size();
        if size < 2 {
            return Err(config_error!(
                "distributed execution needs at least 2 ranks, got {size}"
            ));
        }
        Ok(Self {
            rank: transport.rank(),
            size,
            transport: Some(transport),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Rank 0 owns all file-system phases of a generation.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    pub fn is_distributed(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::single()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}
