//! # Scheduler Module
//!
//! Drives a periodic job: wait an initial grace period, then run one cycle,
//! wait a fixed interval, and repeat until shutdown.
//!
//! ```text
//! Idle -> Waiting(initial) -> { Cycle -> Waiting(interval) }* -> Stopped
//! ```
//!
//! Each cycle runs in its own task, so neither an error nor a panic inside
//! a cycle can take the scheduler down.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a cycle ended, from the job's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Success,
    Failure,
}

/// A unit of periodic work
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Short name for log lines
    fn name(&self) -> &str;

    /// Run a single cycle
    async fn run_once(&self) -> anyhow::Result<CycleResult>;
}

/// Counters reported when the scheduler stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

/// Fixed-cadence driver for a [`ScheduledJob`]
///
/// The interval is constant; there is no back-off across cycles.
pub struct UploadScheduler<J: ScheduledJob> {
    job: Arc<J>,
    initial_delay: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl<J: ScheduledJob> UploadScheduler<J> {
    pub fn new(
        job: Arc<J>,
        initial_delay: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            initial_delay,
            interval,
            cancel,
        }
    }

    /// Run until the cancellation token fires
    pub async fn run(self) -> SchedulerStats {
        let name = self.job.name().to_string();
        let mut stats = SchedulerStats::default();

        info!(
            "{} scheduler started: first cycle in {}s, then every {}s",
            name,
            self.initial_delay.as_secs(),
            self.interval.as_secs()
        );

        if self.wait(self.initial_delay).await {
            loop {
                let Some(result) = self.run_cycle(&name).await else {
                    break;
                };

                stats.cycles += 1;
                if result == CycleResult::Success {
                    stats.consecutive_failures = 0;
                } else {
                    stats.failures += 1;
                    stats.consecutive_failures += 1;
                    if stats.consecutive_failures > 1 {
                        warn!(
                            "{} has failed {} cycles in a row",
                            name, stats.consecutive_failures
                        );
                    }
                }

                if !self.wait(self.interval).await {
                    break;
                }
            }
        }

        info!(
            "{} scheduler stopped after {} cycles ({} failed)",
            name, stats.cycles, stats.failures
        );
        stats
    }

    /// One isolated cycle; `None` if shutdown interrupted it
    async fn run_cycle(&self, name: &str) -> Option<CycleResult> {
        let job = Arc::clone(&self.job);
        let mut handle = tokio::spawn(async move { job.run_once().await });

        let joined = tokio::select! {
            biased;
            joined = &mut handle => joined,
            _ = self.cancel.cancelled() => {
                handle.abort();
                info!("{} cycle interrupted by shutdown", name);
                return None;
            }
        };

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("{} cycle failed: {:#}", name, e);
                CycleResult::Failure
            }
            Err(e) if e.is_panic() => {
                error!("{} cycle panicked; continuing with the next cycle", name);
                CycleResult::Failure
            }
            Err(e) => {
                error!("{} cycle did not complete: {}", name, e);
                CycleResult::Failure
            }
        };
        Some(result)
    }

    /// Returns `false` when interrupted by shutdown
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.cancel.is_cancelled(),
            _ = self.cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Job whose n-th call behaves as scripted; cancels after `stop_after` calls
    struct ScriptedJob {
        calls: AtomicUsize,
        call_times: Mutex<Vec<Instant>>,
        stop_after: usize,
        cancel: CancellationToken,
    }

    impl ScriptedJob {
        fn new(stop_after: usize, cancel: CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
                stop_after,
                cancel,
            })
        }
    }

    #[async_trait]
    impl ScheduledJob for ScriptedJob {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run_once(&self) -> anyhow::Result<CycleResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.call_times.lock().unwrap().push(Instant::now());
            if n >= self.stop_after {
                self.cancel.cancel();
            }
            match n {
                1 => panic!("boom in cycle 1"),
                2 => anyhow::bail!("disk on fire"),
                3 => Ok(CycleResult::Failure),
                _ => Ok(CycleResult::Success),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_the_scheduler() {
        let token = CancellationToken::new();
        let job = ScriptedJob::new(4, token.clone());
        let scheduler = UploadScheduler::new(
            Arc::clone(&job),
            Duration::from_secs(0),
            Duration::from_secs(600),
            token,
        );

        let stats = scheduler.run().await;

        assert_eq!(job.calls.load(Ordering::SeqCst), 4);
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_and_interval_are_respected() {
        let token = CancellationToken::new();
        let job = ScriptedJob::new(5, token.clone());
        let start = Instant::now();
        let scheduler = UploadScheduler::new(
            Arc::clone(&job),
            Duration::from_secs(300),
            Duration::from_secs(600),
            token,
        );

        scheduler.run().await;

        let times = job.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 5);
        assert!(times[0] - start >= Duration::from_secs(300));
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(600));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_initial_wait() {
        let token = CancellationToken::new();
        let job = ScriptedJob::new(usize::MAX, token.clone());
        let scheduler = UploadScheduler::new(
            Arc::clone(&job),
            Duration::from_secs(300),
            Duration::from_secs(600),
            token.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            token.cancel();
        });

        let start = Instant::now();
        let stats = scheduler.run().await;
        canceller.await.unwrap();

        assert_eq!(stats.cycles, 0);
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
        assert!(start.elapsed() < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_interval_is_prompt() {
        let token = CancellationToken::new();
        let job = ScriptedJob::new(usize::MAX, token.clone());
        let scheduler = UploadScheduler::new(
            Arc::clone(&job),
            Duration::from_secs(0),
            Duration::from_secs(3600),
            token.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            token.cancel();
        });

        let start = Instant::now();
        let stats = scheduler.run().await;
        canceller.await.unwrap();

        assert_eq!(stats.cycles, 1);
        assert!(start.elapsed() < Duration::from_secs(3600));
    }
}
