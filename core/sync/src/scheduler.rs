//! Run scheduling - manual and periodic modes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use omnisync_common::{Error, ExecutionMode, RecordId, Result};

use crate::orchestrator::ConfigurationReport;

/// Scheduling mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// Runs only on request.
    Manual,
    /// Run all active configurations at regular intervals, plus requests.
    Periodic { interval: Duration },
}

impl ScheduleMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            Self::Manual => None,
            Self::Periodic { interval } => Some(*interval),
        }
    }
}

/// Run request types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Every active configuration.
    All,
    /// One configuration.
    Configuration(RecordId),
    /// Stop the scheduler.
    Shutdown,
}

/// What a dispatched run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub configurations: usize,
    pub failed_configurations: usize,
    pub duration: Duration,
}

impl RunSummary {
    pub fn from_reports(reports: &[ConfigurationReport], duration: Duration) -> Self {
        Self {
            configurations: reports.len(),
            failed_configurations: reports.iter().filter(|r| !r.is_success()).count(),
            duration,
        }
    }
}

type Reply = oneshot::Sender<Result<RunSummary>>;

/// Front end used to request runs and change the mode.
pub struct Scheduler {
    mode: Arc<RwLock<ScheduleMode>>,
    request_tx: mpsc::Sender<(RunRequest, Reply)>,
}

impl Scheduler {
    /// Create a scheduler and the handle that drives it.
    pub fn new(mode: ScheduleMode) -> (Self, SchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let mode = Arc::new(RwLock::new(mode));

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
        };
        let handle = SchedulerHandle { mode, request_rx };
        (scheduler, handle)
    }

    /// Run every active configuration now.
    pub async fn request_all(&self) -> Result<RunSummary> {
        self.request(RunRequest::All).await
    }

    /// Run one configuration now.
    pub async fn request_configuration(&self, config_id: RecordId) -> Result<RunSummary> {
        self.request(RunRequest::Configuration(config_id)).await
    }

    async fn request(&self, request: RunRequest) -> Result<RunSummary> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::InvalidInput("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::InvalidInput("Scheduler stopped before replying".to_string()))?
    }

    pub async fn set_mode(&self, mode: ScheduleMode) {
        *self.mode.write().await = mode;
    }

    pub async fn mode(&self) -> ScheduleMode {
        self.mode.read().await.clone()
    }

    /// Stop the scheduler after the run in progress, if any.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self.request_tx.send((RunRequest::Shutdown, response_tx)).await;
    }
}

/// Background side of the scheduler.
pub struct SchedulerHandle {
    mode: Arc<RwLock<ScheduleMode>>,
    request_rx: mpsc::Receiver<(RunRequest, Reply)>,
}

impl SchedulerHandle {
    /// Drive the scheduler until shutdown or until every [`Scheduler`] is
    /// dropped.
    ///
    /// `run_fn` is called for each request with [`ExecutionMode::Manual`]
    /// and for each periodic tick with [`RunRequest::All`] and
    /// [`ExecutionMode::Scheduled`]. Runs never overlap.
    pub async fn run<F, Fut>(mut self, run_fn: F)
    where
        F: Fn(RunRequest, ExecutionMode) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<RunSummary>> + Send,
    {
        let mut current = self.mode.read().await.interval();
        let mut ticker = current.map(periodic);

        info!("Scheduler started");

        loop {
            tokio::select! {
                received = self.request_rx.recv() => {
                    let Some((request, response_tx)) = received else {
                        info!("All scheduler front ends dropped");
                        break;
                    };
                    if request == RunRequest::Shutdown {
                        info!("Received shutdown request");
                        break;
                    }
                    debug!(request = ?request, "Processing run request");
                    let result = run_fn(request, ExecutionMode::Manual).await;
                    let _ = response_tx.send(result);
                }

                _ = wait_for_tick(&mut ticker) => {
                    debug!("Triggering scheduled run");
                    match run_fn(RunRequest::All, ExecutionMode::Scheduled).await {
                        Ok(summary) => info!(
                            configurations = summary.configurations,
                            failed = summary.failed_configurations,
                            "Scheduled run completed in {:.2?}",
                            summary.duration
                        ),
                        Err(e) => error!("Scheduled run failed: {}", e),
                    }
                }
            }

            let expected = self.mode.read().await.interval();
            if expected != current {
                debug!(interval = ?expected, "Schedule changed");
                current = expected;
                ticker = current.map(periodic);
            }
        }
    }
}

/// Ticks one period from now, not immediately.
fn periodic(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_for_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_mode_change() {
        let (scheduler, _handle) = Scheduler::new(ScheduleMode::Manual);
        assert_eq!(scheduler.mode().await, ScheduleMode::Manual);

        scheduler
            .set_mode(ScheduleMode::Periodic {
                interval: Duration::from_secs(60),
            })
            .await;
        assert!(matches!(scheduler.mode().await, ScheduleMode::Periodic { .. }));
    }

    #[tokio::test]
    async fn test_manual_request() {
        let (scheduler, handle) = Scheduler::new(ScheduleMode::Manual);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let task = tokio::spawn(async move {
            handle
                .run(move |request, mode| {
                    let seen = seen_clone.clone();
                    async move {
                        if let Ok(mut seen) = seen.lock() {
                            seen.push((request, mode));
                        }
                        Ok(RunSummary {
                            configurations: 1,
                            ..RunSummary::default()
                        })
                    }
                })
                .await;
        });

        let summary = scheduler.request_configuration(RecordId::new(7)).await.unwrap();
        assert_eq!(summary.configurations, 1);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(RunRequest::Configuration(RecordId::new(7)), ExecutionMode::Manual)]
        );

        scheduler.shutdown().await;
        task.await.unwrap();
        assert!(scheduler.request_all().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_are_scheduled() {
        let (scheduler, handle) = Scheduler::new(ScheduleMode::Periodic {
            interval: Duration::from_secs(60),
        });
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let task = tokio::spawn(async move {
            handle
                .run(move |request, mode| {
                    let count = count_clone.clone();
                    async move {
                        assert_eq!(request, RunRequest::All);
                        assert_eq!(mode, ExecutionMode::Scheduled);
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(RunSummary::default())
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
        task.await.unwrap();
    }
}
