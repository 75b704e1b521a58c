//! The scheduler: owns the job table, the timer task, and in-flight runs.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    schedule::{compute_next_run, validate_schedule},
    types::{JobKind, JobReport, JobSpec, JobState, RunStatus, ScheduledJob, SchedulerStatus},
};

/// Executes one run of a job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, kind: JobKind) -> Result<JobReport>;
}

/// Recurring job scheduler. Constructed once, started explicitly, and torn
/// down with [`Scheduler::stop`]; nothing is kept in process-wide state.
pub struct Scheduler {
    runner: Arc<dyn JobRunner>,
    jobs: RwLock<Vec<ScheduledJob>>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    run_handles: Mutex<Vec<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

/// Sleep used when no job has a next run.
const IDLE_POLL_MS: u64 = 60_000;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Scheduler {
    /// Build a scheduler for `specs`. Every schedule is validated up front.
    pub fn new(runner: Arc<dyn JobRunner>, specs: Vec<JobSpec>) -> Result<Arc<Self>> {
        for spec in &specs {
            validate_schedule(&spec.schedule)?;
        }
        let jobs = specs
            .into_iter()
            .map(|spec| ScheduledJob {
                spec,
                state: JobState::default(),
            })
            .collect();
        Ok(Arc::new(Self {
            runner,
            jobs: RwLock::new(jobs),
            timer_handle: Mutex::new(None),
            run_handles: Mutex::new(Vec::new()),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        }))
    }

    /// Compute next runs and start the timer loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if *self.running.read().await {
            return Ok(());
        }

        let now = now_ms();
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.iter_mut() {
                job.state.next_run_at_ms = compute_next_run(&job.spec.schedule, now)?;
            }
            info!(count = jobs.len(), "scheduler starting");
        }

        *self.running.write().await = true;

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });

        *self.timer_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the timer loop and abort any runs still in flight.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        for handle in self.run_handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Run a job immediately, outside its schedule, and record the outcome.
    pub async fn run_now(&self, kind: JobKind) -> Result<JobReport> {
        if !self.jobs.read().await.iter().any(|j| j.spec.kind == kind) {
            return Err(Error::job_not_scheduled(kind));
        }
        self.begin_run(kind).await;
        self.execute_job(kind).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.read().await.clone();
        let next_run_at_ms = jobs.iter().filter_map(|j| j.state.next_run_at_ms).min();
        SchedulerStatus {
            running: *self.running.read().await,
            jobs,
            next_run_at_ms,
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;

            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            self.process_due_jobs().await;
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let jobs = self.jobs.read().await;
        let now = now_ms();
        jobs.iter()
            .filter_map(|j| j.state.next_run_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_POLL_MS)
    }

    async fn process_due_jobs(self: &Arc<Self>) {
        let now = now_ms();
        let due: Vec<JobKind> = {
            let mut jobs = self.jobs.write().await;
            let mut due = Vec::new();
            for job in jobs.iter_mut() {
                if !job.state.next_run_at_ms.is_some_and(|t| t <= now) {
                    continue;
                }
                // Advance before spawning so the next tick does not pick the same slot again.
                job.state.next_run_at_ms =
                    compute_next_run(&job.spec.schedule, now).unwrap_or_else(|e| {
                        error!(job = %job.spec.kind, error = %e, "failed to compute next run");
                        None
                    });
                if job.state.in_flight > 0 {
                    debug!(
                        job = %job.spec.kind,
                        in_flight = job.state.in_flight,
                        "previous run still in flight, starting another"
                    );
                }
                job.state.in_flight += 1;
                due.push(job.spec.kind);
            }
            due
        };

        if due.is_empty() {
            return;
        }

        let mut handles = self.run_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        for kind in due {
            let svc = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _ = svc.execute_job(kind).await;
            }));
        }
    }

    async fn begin_run(&self, kind: JobKind) {
        self.update_job_state(kind, |state| state.in_flight += 1)
            .await;
    }

    async fn execute_job(&self, kind: JobKind) -> Result<JobReport> {
        let started = now_ms();
        info!(job = %kind, "running scheduled job");

        let result = self.runner.run(kind).await;

        let finished = now_ms();
        let duration_ms = finished.saturating_sub(started);
        match &result {
            Ok(report) => info!(
                job = %kind,
                delivered = report.delivered,
                skipped = report.skipped,
                failed = report.failed,
                duration_ms,
                "job finished"
            ),
            Err(e) => warn!(job = %kind, error = %e, duration_ms, "job failed"),
        }

        let (status, last_error, last_report) = match &result {
            Ok(report) => (RunStatus::Ok, None, Some(*report)),
            Err(e) => (RunStatus::Error, Some(e.to_string()), None),
        };
        self.update_job_state(kind, |state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.last_run_at_ms = Some(finished);
            state.last_status = Some(status);
            state.last_error = last_error;
            state.last_duration_ms = Some(duration_ms);
            state.last_report = last_report;
        })
        .await;

        result
    }

    async fn update_job_state(&self, kind: JobKind, f: impl FnOnce(&mut JobState)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.spec.kind == kind) {
            f(&mut job.state);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {super::*, crate::types::JobSchedule};

    /// Counts runs per job; the digest job always fails.
    #[derive(Default)]
    struct CountingRunner {
        sweeps: AtomicUsize,
        digests: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, kind: JobKind) -> Result<JobReport> {
            match kind {
                JobKind::ReminderSweep => {
                    self.sweeps.fetch_add(1, Ordering::SeqCst);
                    Ok(JobReport {
                        delivered: 1,
                        ..JobReport::default()
                    })
                },
                JobKind::WeeklyDigest => {
                    self.digests.fetch_add(1, Ordering::SeqCst);
                    Err(Error::message("digest channel gone"))
                },
                _ => Ok(JobReport::default()),
            }
        }
    }

    fn every(kind: JobKind, every_ms: u64) -> JobSpec {
        JobSpec {
            kind,
            schedule: JobSchedule::Every { every_ms },
        }
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let runner = Arc::new(CountingRunner::default());
        let spec = JobSpec {
            kind: JobKind::WeeklyDigest,
            schedule: JobSchedule::Cron {
                expr: "whenever".into(),
                tz: None,
            },
        };
        assert!(Scheduler::new(runner, vec![spec]).is_err());
    }

    #[tokio::test]
    async fn run_now_records_report() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(runner.clone(), vec![
            every(JobKind::ReminderSweep, 60_000),
            every(JobKind::WeeklyDigest, 60_000),
        ])
        .unwrap();

        let report = scheduler.run_now(JobKind::ReminderSweep).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(scheduler.run_now(JobKind::WeeklyDigest).await.is_err());
        assert!(matches!(
            scheduler.run_now(JobKind::SubscriptionPoll).await,
            Err(Error::JobNotScheduled { .. })
        ));

        let status = scheduler.status().await;
        assert!(!status.running);
        let sweep = &status.jobs[0].state;
        assert_eq!(sweep.last_status, Some(RunStatus::Ok));
        assert_eq!(sweep.last_report, Some(report));
        assert_eq!(sweep.in_flight, 0);
        let digest = &status.jobs[1].state;
        assert_eq!(digest.last_status, Some(RunStatus::Error));
        assert_eq!(digest.last_error.as_deref(), Some("digest channel gone"));
    }

    #[tokio::test]
    async fn timer_runs_due_jobs_until_stopped() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler =
            Scheduler::new(runner.clone(), vec![every(JobKind::ReminderSweep, 20)]).unwrap();

        scheduler.start().await.unwrap();
        assert!(scheduler.status().await.running);
        assert!(scheduler.status().await.next_run_at_ms.is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        let runs = runner.sweeps.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected repeated runs, got {runs}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.sweeps.load(Ordering::SeqCst), runs);
        assert!(!scheduler.status().await.running);
    }

    #[tokio::test]
    async fn separate_schedulers_are_isolated() {
        let a = Arc::new(CountingRunner::default());
        let b = Arc::new(CountingRunner::default());
        let first = Scheduler::new(a.clone(), vec![every(JobKind::ReminderSweep, 60_000)]).unwrap();
        let _second =
            Scheduler::new(b.clone(), vec![every(JobKind::ReminderSweep, 60_000)]).unwrap();

        first.run_now(JobKind::ReminderSweep).await.unwrap();
        assert_eq!(a.sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(b.sweeps.load(Ordering::SeqCst), 0);
    }
}
