//! Spawned worker processes and their termination.

use gf_types::{GfResult, Job, JobError, JobOutcome, JobStatus};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::model::Model;

/// A running model process owned by exactly one executor.
///
/// Each worker leads its own process group, so terminating it reaches the
/// worker's descendants and nothing else.
#[derive(Debug)]
pub struct WorkerHandle {
    job: Job,
    child: Child,
    pid: Option<u32>,
    started: Instant,
}

impl WorkerHandle {
    pub fn spawn(model: &dyn Model, job: Job) -> GfResult<Self> {
        let mut std_command = model.command(&job);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        let mut command = Command::from(std_command);
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|e| JobError::SpawnFailed {
            model_name: job.model_name.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        info!(model = %job.model_name, pid = ?pid, runner = model.name(), "spawned worker");

        Ok(Self {
            job,
            child,
            pid,
            started: Instant::now(),
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn model_name(&self) -> &str {
        &self.job.model_name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Monotonic time since spawn.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self, max_time: Duration) -> bool {
        self.elapsed() > max_time
    }

    /// Non-blocking liveness check. Returns the outcome once the process
    /// has exited.
    pub fn try_finish(&mut self) -> GfResult<Option<JobOutcome>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(self.outcome(exit_status(status)))),
            Ok(None) => Ok(None),
            Err(e) => Err(JobError::PollFailed {
                model_name: self.job.model_name.clone(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Kill the worker's process group, then the worker itself, and reap it.
    /// Processes that already exited are logged and skipped.
    pub async fn terminate(mut self, status: JobStatus) -> JobOutcome {
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }
        if let Err(e) = self.child.start_kill() {
            debug!(model = %self.job.model_name, error = %e, "worker already exited");
        }
        if let Err(e) = self.child.wait().await {
            warn!(model = %self.job.model_name, error = %e, "failed to reap worker");
        }
        self.outcome(status)
    }

    fn outcome(&self, status: JobStatus) -> JobOutcome {
        JobOutcome {
            model_name: self.job.model_name.clone(),
            status,
            elapsed: self.elapsed(),
        }
    }
}

fn exit_status(status: ExitStatus) -> JobStatus {
    if status.success() {
        JobStatus::Completed
    } else {
        JobStatus::Failed(status.code())
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => info!(pgid = pid, "killed process group"),
        Err(Errno::ESRCH) => debug!(pgid = pid, "process group does not exist"),
        Err(e) => warn!(pgid = pid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Supervise a single worker until it exits, killing it once it runs
/// longer than `max_time`.
pub async fn wait_with_timeout(
    mut handle: WorkerHandle,
    max_time: Duration,
    poll_interval: Duration,
) -> JobOutcome {
    loop {
        match handle.try_finish() {
            Ok(Some(outcome)) => return outcome,
            Ok(None) => {}
            Err(e) => {
                warn!(model = %handle.model_name(), error = %e, "lost track of worker");
                return handle.terminate(JobStatus::Failed(None)).await;
            }
        }
        if handle.is_expired(max_time) {
            warn!(
                model = %handle.model_name(),
                pid = ?handle.pid(),
                max_secs = max_time.as_secs_f64(),
                "worker exceeded time budget, terminating"
            );
            return handle.terminate(JobStatus::TimedOut).await;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
