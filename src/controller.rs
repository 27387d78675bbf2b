//! Periodic polling of a [`FeatureSource`] and the status consumers observe.
//!
//! The controller runs as a single task. It fetches once at start-up, then on
//! every interval tick or manual refresh request, and publishes a
//! [`PollStatus`] on a `watch` channel after each transition. At most one
//! fetch is outstanding at any time: refresh requests that arrive while a
//! fetch is running are coalesced into it.

use crate::error::AppError;
use crate::fetcher::FeatureSource;
use crate::model::LiveData;
use crate::pipeline;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Fetching,
    Success,
    Failed,
}

/// Latest controller state, including the last successful result.
#[derive(Debug, Clone)]
pub struct PollStatus {
    pub phase: PollPhase,
    /// Last good result. Kept across failed polls.
    pub data: Option<Arc<LiveData>>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Error from the most recent attempt; cleared on success.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for PollStatus {
    fn default() -> Self {
        Self {
            phase: PollPhase::Idle,
            data: None,
            fetched_at: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// What a dashboard should render for a given status.
#[derive(Debug, Clone)]
pub enum DashboardState {
    /// Nothing loaded yet and no failure to report.
    Loading,
    Fresh {
        data: Arc<LiveData>,
        fetched_at: DateTime<Utc>,
    },
    /// Showing last good data that is overdue or whose refresh failed.
    Stale {
        data: Arc<LiveData>,
        fetched_at: DateTime<Utc>,
        error: Option<String>,
    },
    /// First load failed; there is nothing to show but the error.
    Unavailable { error: String },
}

impl PollStatus {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.fetched_at {
            Some(at) => {
                let age = now.signed_duration_since(at).to_std().unwrap_or(Duration::ZERO);
                age > stale_after
            }
            None => false,
        }
    }

    pub fn dashboard_state(&self, now: DateTime<Utc>, stale_after: Duration) -> DashboardState {
        match (&self.data, self.fetched_at) {
            (Some(data), Some(fetched_at)) => {
                if self.last_error.is_some() || self.is_stale(now, stale_after) {
                    DashboardState::Stale {
                        data: Arc::clone(data),
                        fetched_at,
                        error: self.last_error.clone(),
                    }
                } else {
                    DashboardState::Fresh {
                        data: Arc::clone(data),
                        fetched_at,
                    }
                }
            }
            _ => match (&self.last_error, self.phase) {
                (Some(error), PollPhase::Failed) => DashboardState::Unavailable {
                    error: error.clone(),
                },
                _ => DashboardState::Loading,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A fetch will start as soon as the controller picks it up.
    Queued,
    /// A fetch is already running or already requested.
    Coalesced,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
        }
    }
}

impl From<&crate::config::PollingConfig> for PollSettings {
    fn from(config: &crate::config::PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            initial_delay: config.initial_delay(),
        }
    }
}

/// Consumer side of a running controller. Dropping every handle stops it.
#[derive(Clone)]
pub struct ControllerHandle {
    status: Arc<watch::Sender<PollStatus>>,
    refresh_tx: mpsc::Sender<()>,
    in_flight: Arc<AtomicBool>,
}

impl ControllerHandle {
    /// Registers interest in status updates. Drop the receiver to revoke it.
    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.status.subscribe()
    }

    /// Current status. Results that complete while nobody is subscribed are
    /// discarded (the phase drops back to `Idle`), so data only advances while
    /// a subscription is held.
    pub fn status(&self) -> PollStatus {
        self.status.borrow().clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Asks for a fetch outside the timer.
    pub fn refresh(&self) -> RefreshRequest {
        if self.is_fetching() {
            debug!("Refresh requested while a fetch is in flight; coalescing");
            return RefreshRequest::Coalesced;
        }
        match self.refresh_tx.try_send(()) {
            Ok(()) => RefreshRequest::Queued,
            Err(_) => RefreshRequest::Coalesced,
        }
    }
}

enum Cycle {
    Completed,
    Shutdown,
}

pub struct PollingController<S> {
    source: Arc<S>,
    settings: PollSettings,
    status: Arc<watch::Sender<PollStatus>>,
    refresh_rx: mpsc::Receiver<()>,
    in_flight: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: FeatureSource> PollingController<S> {
    pub fn new(
        source: Arc<S>,
        settings: PollSettings,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, ControllerHandle) {
        let (status_tx, _) = watch::channel(PollStatus::default());
        let status = Arc::new(status_tx);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(false));

        let handle = ControllerHandle {
            status: Arc::clone(&status),
            refresh_tx,
            in_flight: Arc::clone(&in_flight),
        };

        let controller = Self {
            source,
            settings,
            status,
            refresh_rx,
            in_flight,
            shutdown_rx,
        };

        (controller, handle)
    }

    pub async fn run(mut self) {
        info!(
            "Polling controller starting with {:?} initial delay, {:?} interval",
            self.settings.initial_delay, self.settings.interval
        );

        if !self.settings.initial_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.initial_delay) => {},
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown received during initial delay");
                    return;
                }
            }
        }

        // Fetch immediately, then on interval
        if let Cycle::Shutdown = self.poll_once().await {
            return;
        }

        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Cycle::Shutdown = self.poll_once().await {
                        break;
                    }
                }
                request = self.refresh_rx.recv() => {
                    match request {
                        Some(()) => {
                            info!("Manual refresh");
                            if let Cycle::Shutdown = self.poll_once().await {
                                break;
                            }
                            ticker.reset();
                        }
                        None => {
                            info!("All controller handles dropped, stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping polling controller");
                    break;
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Cycle {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Fetch already in flight, skipping");
            return Cycle::Completed;
        }

        self.status.send_modify(|s| s.phase = PollPhase::Fetching);

        let source = Arc::clone(&self.source);
        let outcome = tokio::select! {
            result = source.fetch_features() => Some(result),
            _ = self.shutdown_rx.changed() => None,
        };

        self.in_flight.store(false, Ordering::Release);
        // Requests that raced with this fetch are satisfied by it
        while self.refresh_rx.try_recv().is_ok() {}

        let Some(result) = outcome else {
            info!("Shutdown during fetch; discarding in-flight request");
            return Cycle::Shutdown;
        };

        if self.status.receiver_count() == 0 {
            debug!("No subscribers; discarding fetch result");
            self.status.send_modify(|s| s.phase = PollPhase::Idle);
            return Cycle::Completed;
        }

        self.apply(result);
        Cycle::Completed
    }

    fn apply(&self, result: crate::error::Result<Vec<crate::model::RawFeature>>) {
        match result {
            Ok(features) => {
                let data = pipeline::process(&features);
                info!(
                    "Poll succeeded: {} stations in {} basins ({} of {} features rejected, {:.1}%)",
                    data.snapshots.len(),
                    data.basins.len(),
                    data.stats.rejected,
                    data.stats.total,
                    data.stats.rejection_rate() * 100.0
                );
                let data = Arc::new(data);
                self.status.send_modify(|s| {
                    s.phase = PollPhase::Success;
                    s.data = Some(data);
                    s.fetched_at = Some(Utc::now());
                    s.last_error = None;
                    s.consecutive_failures = 0;
                });
            }
            Err(e) => {
                self.record_failure(&e);
            }
        }
    }

    fn record_failure(&self, e: &AppError) {
        self.status.send_modify(|s| {
            s.phase = PollPhase::Failed;
            s.last_error = Some(e.to_string());
            s.consecutive_failures += 1;
            if s.data.is_some() {
                warn!(
                    "Poll failed ({} in a row), keeping last good snapshot: {}",
                    s.consecutive_failures, e
                );
            } else {
                error!("Initial poll failed, no data available: {}", e);
            }
        });
    }
}
