//! The executor seam between the generation controller and a scheduler.

use async_trait::async_trait;
use gf_types::{config_error, ExecutionMode, ExecutionReport, GeneticConfig, GfResult, Job};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::distributed::DistributedExecutor;
use crate::local::LocalExecutor;
use crate::model::Model;

/// Runs every job of one generation to a terminal state.
///
/// `execute` returns only once no job it was handed is still running, so
/// scoring can safely follow it.
#[async_trait]
pub trait JobExecutor: Send {
    async fn execute(&mut self, jobs: Vec<Job>) -> GfResult<ExecutionReport>;

    fn name(&self) -> &str;
}

/// Pick the executor matching the configured mode and this process's
/// place in the cluster.
pub fn build_executor(
    config: &GeneticConfig,
    context: &ExecutionContext,
    model: Arc<dyn Model>,
) -> GfResult<Box<dyn JobExecutor>> {
    match (config.mode, context.is_distributed()) {
        (ExecutionMode::Local, false) => Ok(Box::new(LocalExecutor::from_config(model, config)?)),
        (ExecutionMode::Distributed, true) => Ok(Box::new(DistributedExecutor::new(
            context,
            model,
            config.max_time(),
            config.scheduling.poll_interval(),
        )?)),
        (ExecutionMode::Local, true) => Err(config_error!(
            "local mode cannot run on rank {} of {}",
            context.rank(),
            context.size()
        )),
        (ExecutionMode::Distributed, false) => Err(config_error!(
            "distributed mode needs a cluster transport"
        )),
    }
}
