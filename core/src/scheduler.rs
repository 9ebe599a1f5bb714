//! Scheduler (C12): absolute-time periodic jobs (sanctions resync, label
//! resync, threat-feed refresh, retention cleanup) with no-overlap,
//! failure isolation, and cooperative cancellation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

pub struct JobSpec {
    pub job: Arc<dyn ScheduledJob>,
    pub interval: Duration,
    pub initial_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Drives each registered job on its own absolute-time ticker
/// (`tokio::time::interval` with `MissedTickBehavior::Skip`, so a slow
/// run never causes a burst of catch-up ticks). A job still running when
/// its interval elapses simply skips that tick rather than overlapping
/// with itself, per §4.8.
pub struct Scheduler {
    jobs: Vec<JobSpec>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Scheduler { jobs: Vec::new(), shutdown_tx, shutdown_rx }
    }

    pub fn register(&mut self, spec: JobSpec) {
        self.jobs.push(spec);
    }

    pub fn start_all(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|spec| {
                let job = spec.job.clone();
                let interval_dur = spec.interval;
                let initial_delay = spec.initial_delay;
                let mut shutdown = self.shutdown_rx.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(initial_delay) => {}
                        _ = shutdown.changed() => return,
                    }

                    let mut ticker = tokio::time::interval(interval_dur);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    let mut running = false;

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                if running {
                                    warn!(job = job.name(), "previous run still in flight, skipping this tick");
                                    continue;
                                }
                                running = true;
                                info!(job = job.name(), "starting scheduled run");
                                if let Err(e) = job.run().await {
                                    error!(job = job.name(), error = %e, "scheduled job failed");
                                }
                                running = false;
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    info!(job = job.name(), "scheduler shutdown observed");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingJob {
        name: String,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            &self.name
        }
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_job_runs_on_schedule_and_stops_on_shutdown() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(JobSpec {
            job: Arc::new(CountingJob { name: "test-job".to_string(), runs: runs.clone() }),
            interval: Duration::from_millis(20),
            initial_delay: Duration::from_millis(0),
        });

        let handles = scheduler.start_all();
        tokio::time::sleep(Duration::from_millis(90)).await;
        scheduler.shutdown();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
        }

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    struct FailingJob;

    #[async_trait]
    impl ScheduledJob for FailingJob {
        fn name(&self) -> &str {
            "failing-job"
        }
        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_job_failure_does_not_cancel_the_loop() {
        let mut scheduler = Scheduler::new();
        scheduler.register(JobSpec { job: Arc::new(FailingJob), interval: Duration::from_millis(10), initial_delay: Duration::from_millis(0) });

        let handles = scheduler.start_all();
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown();
        for handle in handles {
            assert!(tokio::time::timeout(Duration::from_millis(200), handle).await.is_ok());
        }
    }
}
