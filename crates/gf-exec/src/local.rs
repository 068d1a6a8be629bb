//! Bounded single-machine process pool.

use async_trait::async_trait;
use gf_types::{
    config_error, ExecutionReport, GeneticConfig, GfError, GfResult, Job, JobOutcome, JobStatus,
    SchedulingConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::executor::JobExecutor;
use crate::model::Model;
use crate::process::WorkerHandle;

/// Runs one model process per job with at most `n_cores` alive at once,
/// killing any worker that outlives `max_time`.
pub struct LocalExecutor {
    model: Arc<dyn Model>,
    n_cores: usize,
    max_time: Duration,
    poll_interval: Duration,
    drain_interval: Duration,
    spawn_stagger: Duration,
    active: Vec<WorkerHandle>,
    report: ExecutionReport,
}

impl LocalExecutor {
    pub fn new(model: Arc<dyn Model>, n_cores: usize, max_time: Duration) -> GfResult<Self> {
        if n_cores == 0 {
            return Err(config_error!("n_cores must be at least 1"));
        }
        let scheduling = SchedulingConfig::default();
        Ok(Self {
            model,
            n_cores,
            max_time,
            poll_interval: scheduling.poll_interval(),
            drain_interval: scheduling.drain_interval(),
            spawn_stagger: scheduling.spawn_stagger(),
            active: Vec::new(),
            report: ExecutionReport::default(),
        })
    }

    pub fn from_config(model: Arc<dyn Model>, config: &GeneticConfig) -> GfResult<Self> {
        Ok(Self::new(model, config.n_cores, config.max_time())?.with_scheduling(&config.scheduling))
    }

    pub fn with_scheduling(mut self, scheduling: &SchedulingConfig) -> Self {
        self.poll_interval = scheduling.poll_interval();
        self.drain_interval = scheduling.drain_interval();
        self.spawn_stagger = scheduling.spawn_stagger();
        self
    }

    /// Workers spawned and not yet reaped.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Wait for a free slot, then start `job` without waiting for it.
    pub async fn submit(&mut self, job: Job) -> GfResult<()> {
        self.reap().await;
        while self.active.len() >= self.n_cores {
            self.kill_expired().await;
            tokio::time::sleep(self.poll_interval).await;
            self.reap().await;
        }

        match WorkerHandle::spawn(self.model.as_ref(), job.clone()) {
            Ok(handle) => {
                self.active.push(handle);
                self.report.peak_active = self.report.peak_active.max(self.active.len());
            }
            Err(e) => {
                error!(model = %job.model_name, error = %e, "could not start model run");
                self.report.outcomes.push(JobOutcome {
                    model_name: job.model_name,
                    status: JobStatus::SpawnFailed,
                    elapsed: Duration::ZERO,
                });
            }
        }

        tokio::time::sleep(self.spawn_stagger).await;
        Ok(())
    }

    /// Block until every worker has exited or been killed, and hand back
    /// everything observed since the previous drain.
    pub async fn drain_all(&mut self) -> GfResult<ExecutionReport> {
        loop {
            self.reap().await;
            self.kill_expired().await;
            if self.active.is_empty() {
                break;
            }
            tokio::time::sleep(self.drain_interval).await;
        }

        let report = std::mem::take(&mut self.report);
        info!(
            completed = report.completed(),
            timed_out = report.timed_out(),
            total = report.outcomes.len(),
            peak_active = report.peak_active,
            "local pool drained"
        );
        Ok(report)
    }

    /// Move exited workers into the report.
    async fn reap(&mut self) {
        let mut still_running = Vec::with_capacity(self.active.len());
        let mut lost = Vec::new();
        for mut handle in std::mem::take(&mut self.active) {
            match handle.try_finish() {
                Ok(Some(outcome)) => {
                    info!(
                        model = %outcome.model_name,
                        status = ?outcome.status,
                        secs = outcome.elapsed.as_secs_f64(),
                        "worker finished"
                    );
                    self.report.outcomes.push(outcome);
                }
                Ok(None) => still_running.push(handle),
                Err(e) => lost.push((handle, e)),
            }
        }
        self.active = still_running;

        for (handle, e) in lost {
            self.abandon(handle, &e).await;
        }
    }

    /// Give up on a worker that can no longer be polled, taking its process
    /// group down with it.
    async fn abandon(&mut self, handle: WorkerHandle, error: &GfError) {
        warn!(model = %handle.model_name(), error = %error, "lost track of worker");
        let outcome = handle.terminate(JobStatus::Failed(None)).await;
        self.report.outcomes.push(outcome);
    }

    async fn kill_expired(&mut self) {
        let max_time = self.max_time;
        let (expired, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|handle| handle.is_expired(max_time));
        self.active = alive;

        for handle in expired {
            warn!(
                model = %handle.model_name(),
                pid = ?handle.pid(),
                max_secs = max_time.as_secs_f64(),
                "worker exceeded time budget, terminating"
            );
            let outcome = handle.terminate(JobStatus::TimedOut).await;
            self.report.outcomes.push(outcome);
        }
    }
}

#[async_trait]
impl JobExecutor for LocalExecutor {
    async fn execute(&mut self, jobs: Vec<Job>) -> GfResult<ExecutionReport> {
        info!(jobs = jobs.len(), n_cores = self.n_cores, "running models on local pool");
        for job in jobs {
            self.submit(job).await?;
        }
        self.drain_all().await
    }

    fn name(&self) -> &str {
        "local"
    }
}
