//! Pull-based master/worker execution across ranks.
//!
//! Rank 0 holds the job queue and hands out one job per "ready" message.
//! Once the queue is empty it sends a stop sentinel to every worker rank.
//! All ranks meet on a barrier before and after the exchange, so the
//! coordinator only scores once every worker has stopped.

use async_trait::async_trait;
use gf_types::{config_error, ExecutionReport, GfResult, Job, JobOutcome, JobStatus};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::context::ExecutionContext;
use crate::executor::JobExecutor;
use crate::model::Model;
use crate::process::{wait_with_timeout, WorkerHandle};
use crate::transport::{unexpected, Channel, Message, Transport};

pub struct DistributedExecutor {
    transport: Arc<dyn Transport>,
    model: Arc<dyn Model>,
    max_time: Duration,
    poll_interval: Duration,
}

impl DistributedExecutor {
    pub fn new(
        context: &ExecutionContext,
        model: Arc<dyn Model>,
        max_time: Duration,
        poll_interval: Duration,
    ) -> GfResult<Self> {
        let transport = context
            .transport()
            .cloned()
            .ok_or_else(|| config_error!("distributed execution requires a transport"))?;
        Ok(Self {
            transport,
            model,
            max_time,
            poll_interval,
        })
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    /// Run one EXECUTE phase. Rank 0 dispatches `jobs`; other ranks ignore
    /// their argument and run whatever they are assigned.
    pub async fn run(&self, jobs: Vec<Job>) -> GfResult<ExecutionReport> {
        let transport = self.transport.as_ref();
        transport.barrier().await?;

        let report = if transport.rank() == 0 {
            self.dispatch(jobs).await?
        } else {
            self.work().await?
        };

        transport.barrier().await?;
        if transport.rank() == 0 {
            self.discard_stale_ready().await;
        }
        Ok(report)
    }

    async fn dispatch(&self, jobs: Vec<Job>) -> GfResult<ExecutionReport> {
        let transport = self.transport.as_ref();
        let mut queue: VecDeque<Job> = jobs.into();
        let mut report = ExecutionReport::default();
        info!(jobs = queue.len(), workers = transport.size() - 1, "dispatching jobs");

        while !queue.is_empty() {
            let Some(envelope) = transport.try_recv(Channel::Ready).await? else {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };
            if envelope.message != Message::Ready {
                return Err(unexpected(0, &envelope));
            }

            if let Some(job) = queue.pop_front() {
                debug!(model = %job.model_name, worker = envelope.source, "assigning job");
                report.assignments.push((job.model_name.clone(), envelope.source));
                transport.send(envelope.source, Message::Assign(job)).await?;
            }
        }

        for worker in 1..transport.size() {
            transport.send(worker, Message::Stop).await?;
        }
        info!(assigned = report.assignments.len(), "queue empty, stop sent to all workers");
        Ok(report)
    }

    async fn work(&self) -> GfResult<ExecutionReport> {
        let transport = self.transport.as_ref();
        let rank = transport.rank();
        let mut report = ExecutionReport::default();

        loop {
            transport.send(0, Message::Ready).await?;
            let envelope = transport.recv(Channel::Assignment).await?;
            match envelope.message {
                Message::Stop => {
                    report.stops_received += 1;
                    break;
                }
                Message::Assign(job) => {
                    let outcome = self.run_one(job).await;
                    info!(
                        rank,
                        model = %outcome.model_name,
                        status = ?outcome.status,
                        secs = outcome.elapsed.as_secs_f64(),
                        "job finished"
                    );
                    report.outcomes.push(outcome);
                }
                _ => return Err(unexpected(rank, &envelope)),
            }
        }

        info!(rank, jobs = report.outcomes.len(), "worker stopped");
        Ok(report)
    }

    async fn run_one(&self, job: Job) -> JobOutcome {
        match WorkerHandle::spawn(self.model.as_ref(), job.clone()) {
            Ok(handle) => wait_with_timeout(handle, self.max_time, self.poll_interval).await,
            Err(e) => {
                error!(model = %job.model_name, error = %e, "could not start model run");
                JobOutcome {
                    model_name: job.model_name,
                    status: JobStatus::SpawnFailed,
                    elapsed: Duration::ZERO,
                }
            }
        }
    }

    /// Every worker's last "ready" goes unanswered; drop those so they are
    /// not mistaken for requests in the next generation. Each worker sent
    /// it before its barrier arrival on the same ordered link, so all of
    /// them are queued by now.
    ///
    /// A worker that already hung up closes the channel once its queued
    /// messages are read, which ends the drain as well.
    async fn discard_stale_ready(&self) {
        let mut discarded = 0;
        while let Ok(Some(_)) = self.transport.try_recv(Channel::Ready).await {
            discarded += 1;
        }
        debug!(discarded, "dropped unanswered ready messages");
    }
}

#[async_trait]
impl JobExecutor for DistributedExecutor {
    async fn execute(&mut self, jobs: Vec<Job>) -> GfResult<ExecutionReport> {
        self.run(jobs).await
    }

    fn name(&self) -> &str {
        "distributed"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::CommandModel;
    use crate::transport::{LocalTransport, TcpTransport};
    use std::collections::BTreeSet;

    const POLL: Duration = Duration::from_millis(5);

    fn jobs(dir: &std::path::Path, generation: usize, n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| {
                let name = format!("g{generation}_{i}");
                Job::new(name.clone(), dir.join(format!("{name}.par")), dir.to_path_buf())
            })
            .collect()
    }

    fn executors(
        transports: Vec<Arc<dyn Transport>>,
        model: Arc<dyn Model>,
        max_time: Duration,
    ) -> Vec<DistributedExecutor> {
        transports
            .into_iter()
            .map(|t| {
                let context = ExecutionContext::distributed(t).unwrap();
                DistributedExecutor::new(&context, Arc::clone(&model), max_time, POLL).unwrap()
            })
            .collect()
    }

    fn local_cluster(size: usize) -> Vec<Arc<dyn Transport>> {
        LocalTransport::cluster(size)
            .unwrap()
            .into_iter()
            .map(|t| Arc::new(t) as Arc<dyn Transport>)
            .collect()
    }

    /// Run one EXECUTE phase on every rank; returns reports indexed by rank.
    async fn run_phase(executors: Vec<DistributedExecutor>, jobs: Vec<Job>) -> Vec<ExecutionReport> {
        let mut tasks = Vec::new();
        for executor in executors {
            let jobs = if executor.rank() == 0 { jobs.clone() } else { Vec::new() };
            tasks.push(tokio::spawn(async move {
                let report = executor.run(jobs).await.unwrap();
                (executor, report)
            }));
        }
        let mut reports = Vec::new();
        for task in tasks {
            reports.push(task.await.unwrap().1);
        }
        reports
    }

    #[tokio::test]
    async fn every_job_assigned_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("touch {out}/{name}.done"));
        let executors = executors(local_cluster(4), model, Duration::from_secs(10));
        let jobs = jobs(dir.path(), 1, 10);

        let reports = run_phase(executors, jobs.clone()).await;

        let master = &reports[0];
        let assigned: Vec<_> = master.assignments.iter().map(|(name, _)| name.clone()).collect();
        let expected: Vec<_> = jobs.iter().map(|j| j.model_name.clone()).collect();
        assert_eq!(assigned, expected, "dispatch follows queue order");
        assert!(master.assignments.iter().all(|(_, rank)| (1..4).contains(rank)));
        assert!(master.outcomes.is_empty());

        let mut finished = BTreeSet::new();
        for worker in &reports[1..] {
            assert_eq!(worker.stops_received, 1);
            for outcome in &worker.outcomes {
                assert_eq!(outcome.status, JobStatus::Completed);
                assert!(finished.insert(outcome.model_name.clone()));
            }
        }
        assert_eq!(finished.len(), 10);
        for job in &jobs {
            assert!(dir.path().join(format!("{}.done", job.model_name)).exists());
        }
    }

    #[tokio::test]
    async fn empty_queue_still_stops_every_worker() {
        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("true"));
        let executors = executors(local_cluster(3), model, Duration::from_secs(10));

        let reports = run_phase(executors, Vec::new()).await;

        assert!(reports[0].assignments.is_empty());
        assert!(reports[1..].iter().all(|r| r.stops_received == 1));
    }

    #[tokio::test]
    async fn workers_kill_overdue_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("sleep 30"));
        let executors = executors(local_cluster(3), model, Duration::from_millis(200));

        let reports = run_phase(executors, jobs(dir.path(), 1, 3)).await;

        let timed_out: usize = reports[1..].iter().map(|r| r.timed_out()).sum();
        assert_eq!(timed_out, 3);
    }

    #[tokio::test]
    async fn consecutive_generations_reuse_the_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("true"));
        let transports = local_cluster(3);

        for generation in 1..=3 {
            let executors = executors(transports.clone(), Arc::clone(&model), Duration::from_secs(10));
            let reports = run_phase(executors, jobs(dir.path(), generation, 4)).await;
            assert_eq!(reports[0].assignments.len(), 4, "generation {generation}");
            let done: usize = reports[1..].iter().map(|r| r.completed()).sum();
            assert_eq!(done, 4, "generation {generation}");
        }
    }

    #[tokio::test]
    async fn runs_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let wait = Duration::from_secs(5);

        let mut pending = Vec::new();
        for rank in 1..3 {
            let addr = addr.clone();
            pending.push(tokio::spawn(async move {
                TcpTransport::worker(&addr, rank, 3, wait).await.unwrap()
            }));
        }
        let mut transports: Vec<Arc<dyn Transport>> =
            vec![Arc::new(TcpTransport::coordinator(listener, 3, wait).await.unwrap())];
        for worker in pending {
            transports.push(Arc::new(worker.await.unwrap()));
        }

        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("touch {out}/{name}.done"));
        let reports = run_phase(executors(transports, model, wait), jobs(dir.path(), 2, 5)).await;

        assert_eq!(reports[0].assignments.len(), 5);
        assert!(reports[1..].iter().all(|r| r.stops_received == 1));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 5);
    }

    #[test]
    fn requires_a_transport() {
        let model: Arc<dyn Model> = Arc::new(CommandModel::shell("true"));
        let result = DistributedExecutor::new(
            &ExecutionContext::single(),
            model,
            Duration::from_secs(1),
            POLL,
        );
        assert!(result.is_err());
    }
}
