use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use super::PublishStore;
use crate::config::SchedulerSettings;
use crate::db::PublishOutcome;
use crate::error::{AppError, Result};

/// Per-article outcomes of one find-due-and-publish pass.
#[derive(Debug)]
pub struct BatchReport {
    pub ran_at: DateTime<Utc>,
    pub outcomes: Vec<(i64, Result<PublishOutcome>)>,
}

impl BatchReport {
    /// Articles this pass actually published.
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, result)| matches!(result, Ok(PublishOutcome::Published { .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, result)| result.is_err()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (i64, &AppError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, result)| result.as_ref().err().map(|e| (*id, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LastRun {
    pub ran_at: DateTime<Utc>,
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub running: bool,
    pub last_run: Option<LastRun>,
}

/// Shared between the scheduler handle and its background loop.
struct Publisher {
    store: Arc<dyn PublishStore>,
    // Serializes passes so a manual trigger never overlaps a timed wake.
    run_lock: Mutex<()>,
    last_run: Mutex<Option<LastRun>>,
}

impl Publisher {
    #[instrument(skip(self))]
    async fn run_pass(&self) -> Result<BatchReport> {
        let _guard = self.run_lock.lock().await;
        let ran_at = Utc::now();

        let due = match self.store.find_due(ran_at).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to query due articles");
                *self.last_run.lock().await = Some(LastRun {
                    ran_at,
                    published: 0,
                    failed: 0,
                });
                return Err(e);
            }
        };

        debug!(due = due.len(), "Found due articles");

        let mut outcomes = Vec::with_capacity(due.len());
        for article_id in due {
            let result = self.store.publish(article_id, Utc::now()).await;
            match &result {
                Ok(PublishOutcome::Published { at }) => {
                    info!(article_id, published_at = %at, "Published scheduled article");
                }
                Ok(PublishOutcome::AlreadyPublished) => {
                    debug!(article_id, "Article already published, skipping");
                }
                Err(e) => {
                    error!(
                        article_id,
                        error = %e,
                        storage = e.is_storage(),
                        "Failed to publish article"
                    );
                }
            }
            outcomes.push((article_id, result));
        }

        let report = BatchReport { ran_at, outcomes };
        *self.last_run.lock().await = Some(LastRun {
            ran_at,
            published: report.published(),
            failed: report.failed(),
        });
        Ok(report)
    }

    async fn run_due_now(&self) -> usize {
        match self.run_pass().await {
            Ok(report) => report.published(),
            Err(_) => 0,
        }
    }
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    interval_minutes: u32,
}

struct LoopState {
    settings: SchedulerSettings,
    running: Option<RunningLoop>,
}

impl LoopState {
    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    fn stop(&mut self) -> Option<JoinHandle<()>> {
        let running = self.running.take()?;
        let _ = running.shutdown_tx.send(true);
        Some(running.handle)
    }
}

/// Owns the scheduled-publishing loop and its operator settings.
///
/// The loop is `Stopped` until [`PublishScheduler::start`] or an enabling
/// [`PublishScheduler::configure`] call, and each wake runs one pass through
/// the same path as [`PublishScheduler::run_due_now`].
pub struct PublishScheduler {
    publisher: Arc<Publisher>,
    state: Mutex<LoopState>,
}

impl PublishScheduler {
    pub fn new(store: Arc<dyn PublishStore>, settings: SchedulerSettings) -> Self {
        Self {
            publisher: Arc::new(Publisher {
                store,
                run_lock: Mutex::new(()),
                last_run: Mutex::new(None),
            }),
            state: Mutex::new(LoopState {
                settings,
                running: None,
            }),
        }
    }

    /// Start the loop if the current settings enable it. No-op when running.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.settings.enabled && !state.is_running() {
            let interval_minutes = state.settings.interval_minutes;
            state.running = Some(spawn_loop(
                Arc::clone(&self.publisher),
                interval_minutes,
                minutes(interval_minutes),
            ));
        }
    }

    /// Stop the loop and wait for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        let handle = self.state.lock().await.stop();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Publishing loop ended abnormally");
            }
        }
    }

    /// Apply new operator settings.
    ///
    /// Invalid intervals are rejected before anything changes. Accepted
    /// settings are persisted, then the loop is started, stopped or restarted
    /// with the new interval as needed.
    pub async fn configure(&self, enabled: bool, interval_minutes: u32) -> Result<()> {
        let settings = SchedulerSettings::new(enabled, interval_minutes)?;

        let mut state = self.state.lock().await;
        self.publisher.store.save_scheduler_settings(&settings).await?;
        state.settings = settings;

        if !enabled {
            if state.stop().is_some() {
                info!("Scheduled publishing disabled");
            }
            return Ok(());
        }

        let current_interval = state
            .running
            .as_ref()
            .filter(|_| state.is_running())
            .map(|running| running.interval_minutes);
        if current_interval != Some(interval_minutes) {
            state.stop();
            state.running = Some(spawn_loop(
                Arc::clone(&self.publisher),
                interval_minutes,
                minutes(interval_minutes),
            ));
            info!(interval_minutes, "Scheduled publishing enabled");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            enabled: state.settings.enabled,
            interval_minutes: state.settings.interval_minutes,
            running: state.is_running(),
            last_run: *self.publisher.last_run.lock().await,
        }
    }

    /// One pass with per-article outcomes. Fails only if the due scan fails.
    pub async fn run_due_report(&self) -> Result<BatchReport> {
        self.publisher.run_pass().await
    }

    /// One pass; returns how many articles were published. Errors are logged
    /// and count as zero.
    pub async fn run_due_now(&self) -> usize {
        self.publisher.run_due_now().await
    }

    pub async fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<i64>> {
        self.publisher.store.find_due(as_of).await
    }

    pub async fn publish(&self, article_id: i64) -> Result<PublishOutcome> {
        self.publisher.store.publish(article_id, Utc::now()).await
    }
}

impl Drop for PublishScheduler {
    fn drop(&mut self) {
        self.state.get_mut().stop();
    }
}

fn minutes(interval_minutes: u32) -> Duration {
    Duration::from_secs(u64::from(interval_minutes) * 60)
}

fn spawn_loop(publisher: Arc<Publisher>, interval_minutes: u32, period: Duration) -> RunningLoop {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_minutes, "Publishing loop started");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // A panicking pass must not take the loop down with it.
                    let pass = Arc::clone(&publisher);
                    match tokio::spawn(async move { pass.run_due_now().await }).await {
                        Ok(0) => debug!("No articles due"),
                        Ok(published) => info!(published, "Published due articles"),
                        Err(e) => error!(error = %e, "Publishing pass aborted"),
                    }
                }
            }
        }

        info!("Publishing loop stopped");
    });

    RunningLoop {
        shutdown_tx,
        handle,
        interval_minutes,
    }
}
