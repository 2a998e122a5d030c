//! Idle-container reaper.
//!
//! A background loop that tracks when each running container was last used and stops the ones
//! idle for longer than the configured threshold. Stops go through the [`Controller`], so they
//! serialize with any other lifecycle operation on the same container.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use cclife_model::ContainerId;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{controller::Controller, driver::StopRequest, metrics::Outcome};

/// Reaper timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// A container idle for longer than this is stopped.
    pub idle_threshold: Duration,
    /// Time between two sweeps.
    pub sweep_interval: Duration,
}

impl ReaperConfig {
    pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(20);

    /// Zero values fall back to the defaults.
    pub fn new(idle_threshold: Duration, sweep_interval: Duration) -> Self {
        Self::default().with_overrides(idle_threshold, sweep_interval)
    }

    /// Replace the non-zero values, keep the current ones otherwise.
    pub fn with_overrides(mut self, idle_threshold: Duration, sweep_interval: Duration) -> Self {
        if !idle_threshold.is_zero() {
            self.idle_threshold = idle_threshold;
        }
        if !sweep_interval.is_zero() {
            self.sweep_interval = sweep_interval;
        }
        self
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Self::DEFAULT_IDLE_THRESHOLD,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

struct Tracked {
    id: ContainerId,
    active_at: Instant,
}

struct Inner {
    controller: Arc<Controller>,
    driver_kind: String,
    cfg: ReaperConfig,
    tracked: RwLock<HashMap<String, Tracked>>,
    shutdown: CancellationToken,
}

/// Stops containers that have been idle for too long.
///
/// Tracking data is fed by the execution facade after every successful call.
/// The sweep loop starts in [`Reaper::new`] and runs until [`Reaper::close`] or drop.
pub struct Reaper {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Start the sweep loop on the current tokio runtime.
    pub fn new(controller: Arc<Controller>, driver_kind: impl Into<String>, cfg: ReaperConfig) -> Self {
        let inner = Arc::new(Inner {
            controller,
            driver_kind: driver_kind.into(),
            cfg,
            tracked: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });
        info!(
            driver = %inner.driver_kind,
            idle_threshold_ms = cfg.idle_threshold.as_millis() as u64,
            sweep_interval_ms = cfg.sweep_interval.as_millis() as u64,
            "reaper started"
        );
        let task = tokio::spawn(Arc::clone(&inner).run());
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    #[inline]
    pub fn config(&self) -> ReaperConfig {
        self.inner.cfg
    }

    /// Start tracking `name`, replacing any previous entry.
    pub fn track(&self, name: impl Into<String>, id: ContainerId, active_at: Instant) {
        let name = name.into();
        trace!(name = %name, "tracking container");
        self.inner
            .write()
            .insert(name, Tracked { id, active_at });
    }

    /// Update the activity time of a tracked container. Untracked names are ignored.
    pub fn touch(&self, name: &str, active_at: Instant) {
        match self.inner.write().get_mut(name) {
            Some(t) => t.active_at = active_at,
            None => warn!(name, "touch on untracked container ignored"),
        }
    }

    /// Track `name` if absent, touch it otherwise.
    pub fn record_activity(&self, name: &str, id: &ContainerId, active_at: Instant) {
        let mut tracked = self.inner.write();
        match tracked.get_mut(name) {
            Some(t) => t.active_at = active_at,
            None => {
                trace!(name, "tracking container");
                tracked.insert(
                    name.to_string(),
                    Tracked {
                        id: id.clone(),
                        active_at,
                    },
                );
            }
        }
    }

    /// Stop tracking `name`. Returns whether it was tracked.
    pub fn untrack(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Tracked names, sorted.
    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn last_active(&self, name: &str) -> Option<Instant> {
        self.inner.read().get(name).map(|t| t.active_at)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request loop termination. Safe to call more than once.
    ///
    /// A sweep already running finishes; no new sweep starts afterwards.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        info!(driver = %self.inner.driver_kind, "reaper closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Close and wait for the loop task to exit.
    pub async fn shutdown(&self) {
        self.close();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "reaper task ended abnormally");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let period = self.cfg.sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.sweep().await;
                }
            }
        }
        debug!(driver = %self.driver_kind, "reaper loop exited");
    }

    /// Stop every container idle past the threshold. Returns the number evicted.
    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, ContainerId)> = self
            .read()
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.active_at) > self.cfg.idle_threshold)
            .map(|(name, t)| (name.clone(), t.id.clone()))
            .collect();
        if expired.is_empty() {
            return 0;
        }
        debug!(count = expired.len(), "stopping idle containers");

        let mut evicted = 0;
        for (name, id) in expired {
            let req = StopRequest {
                id,
                timeout: Duration::ZERO,
                keep_running: false,
                keep_artifact: true,
            };
            let res = self
                .controller
                .dispatch(&CancellationToken::new(), &self.driver_kind, req.into())
                .await;
            match res {
                Ok(_) => {
                    self.write().remove(&name);
                    self.controller
                        .metrics()
                        .record_eviction(&self.driver_kind, Outcome::Success);
                    info!(name = %name, "idle container stopped");
                    evicted += 1;
                }
                Err(e) => {
                    self.controller
                        .metrics()
                        .record_eviction(&self.driver_kind, Outcome::Failure);
                    warn!(name = %name, error = %e, "failed to stop idle container; will retry");
                }
            }
        }
        evicted
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Tracked>> {
        self.tracked.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Tracked>> {
        self.tracked.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DriverRouter, kinds,
        mock::{MockCall, MockDriver},
    };

    fn id(name: &str) -> ContainerId {
        ContainerId::new("peer0", "dev", name, "1.0")
    }

    fn reaper(driver: &Arc<MockDriver>, idle: u64, sweep: u64) -> Reaper {
        let ctl = Arc::new(Controller::new(DriverRouter::new().with(Arc::clone(driver) as _)));
        Reaper::new(
            ctl,
            kinds::MOCK,
            ReaperConfig::new(Duration::from_secs(idle), Duration::from_secs(sweep)),
        )
    }

    #[test]
    fn zero_config_values_use_defaults() {
        let cfg = ReaperConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(cfg.idle_threshold, ReaperConfig::DEFAULT_IDLE_THRESHOLD);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
        assert_eq!(
            ReaperConfig::new(Duration::ZERO, Duration::ZERO),
            ReaperConfig::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_containers_past_threshold() {
        let driver = Arc::new(MockDriver::new());
        let reaper = reaper(&driver, 10, 1);

        reaper.track("a:1.0", id("a"), Instant::now());
        time::sleep(Duration::from_secs(10)).await;
        reaper.track("b:1.0", id("b"), Instant::now());
        time::sleep(Duration::from_secs(5)).await;

        assert!(!reaper.is_tracked("a:1.0"));
        assert!(reaper.is_tracked("b:1.0"));
        assert_eq!(driver.calls(), vec![MockCall::Stop("a-1.0".into())]);
        reaper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn touch_postpones_eviction() {
        let driver = Arc::new(MockDriver::new());
        let reaper = reaper(&driver, 10, 1);

        let t0 = Instant::now();
        reaper.track("a:1.0", id("a"), t0);
        reaper.track("b:1.0", id("b"), t0);
        time::sleep(Duration::from_secs(7)).await;
        reaper.touch("b:1.0", Instant::now());
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(reaper.tracked_names(), vec!["b:1.0".to_string()]);
        assert!(reaper.last_active("b:1.0").is_some_and(|at| at > t0));
        assert_eq!(driver.count(crate::Action::Stop), 1);
        reaper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn touch_untracked_is_noop() {
        let driver = Arc::new(MockDriver::new());
        let reaper = reaper(&driver, 10, 1);

        reaper.touch("ghost:1.0", Instant::now());
        assert!(reaper.is_empty());

        reaper.record_activity("cc:1.0", &id("cc"), Instant::now());
        assert_eq!(reaper.len(), 1);
        assert!(reaper.untrack("cc:1.0"));
        assert!(!reaper.untrack("cc:1.0"));
        reaper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_is_retried() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_stop("busy");
        let reaper = reaper(&driver, 1, 1);

        reaper.track("a:1.0", id("a"), Instant::now());
        time::sleep(Duration::from_millis(3500)).await;
        assert!(reaper.is_tracked("a:1.0"));
        let attempts = driver.count(crate::Action::Stop);
        assert!(attempts >= 1);

        driver.clear_failures();
        time::sleep(Duration::from_secs(2)).await;
        assert!(!reaper.is_tracked("a:1.0"));
        assert!(driver.count(crate::Action::Stop) > attempts);
        reaper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_sweep_after_close() {
        let driver = Arc::new(MockDriver::new());
        let reaper = reaper(&driver, 1, 1);

        reaper.track("a:1.0", id("a"), Instant::now());
        reaper.close();
        reaper.close();
        assert!(reaper.is_closed());

        time::sleep(Duration::from_secs(10)).await;
        assert!(reaper.is_tracked("a:1.0"));
        assert!(driver.calls().is_empty());

        reaper.shutdown().await;
        reaper.shutdown().await;
    }
}
