//! Scheduler module for running probe cycles and reloading configuration.

mod retention;

pub use retention::*;

use crate::config::ConfigLoader;
use crate::correlator::IncidentCorrelator;
use crate::db::{ServiceSample, Store};
use crate::notify::{AlertDispatcher, Notifier};
use crate::probe::{ProbeOutcome, Prober};
use crate::registry::{RegistryView, TargetRegistry};

use chrono::Utc;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Capacity of the queue between the correlator and the notifier.
const ALERT_QUEUE_CAPACITY: usize = 64;

/// Extra time granted to a prober beyond its own timeout before the
/// scheduler gives up on it.
const PROBE_GRACE: Duration = Duration::from_secs(1);

/// Stage of the probe cycle currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Probing,
    Recording,
    Correlating,
    Pruning,
}

/// What one probe cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub recorded: usize,
    pub alerts: usize,
    pub pruned: usize,
}

/// Drives the probe loop and the config-watch loop.
pub struct Scheduler {
    registry: Arc<TargetRegistry>,
    store: Arc<Store>,
    loader: Arc<dyn ConfigLoader>,
    prober: Arc<dyn Prober>,
    correlator: IncidentCorrelator,
    retention: RetentionManager,
    dispatcher: AlertDispatcher,
    watch_interval: Duration,
    interval_tx: watch::Sender<Duration>,
    phase_tx: watch::Sender<CyclePhase>,
    /// Serializes cycles; holds the timestamp of the last recorded batch.
    cycle_lock: Mutex<i64>,
    stop: broadcast::Sender<()>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a new scheduler. Must be called inside a tokio runtime.
    pub fn new(
        registry: Arc<TargetRegistry>,
        store: Arc<Store>,
        loader: Arc<dyn ConfigLoader>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        watch_interval: Duration,
    ) -> Self {
        let period = registry.current().snapshot().check_interval();
        let (interval_tx, _) = watch::channel(period);
        let (phase_tx, _) = watch::channel(CyclePhase::Idle);
        let (stop, _) = broadcast::channel(1);

        Self {
            correlator: IncidentCorrelator::new(store.clone()),
            retention: RetentionManager::new(store.clone()),
            dispatcher: AlertDispatcher::start(notifier, ALERT_QUEUE_CAPACITY),
            registry,
            store,
            loader,
            prober,
            watch_interval,
            interval_tx,
            phase_tx,
            cycle_lock: Mutex::new(0),
            stop,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start the probe loop and the config-watch loop.
    pub fn start(self: &Arc<Self>) {
        let view = self.registry.current();
        tracing::info!(
            "Starting scheduler with {} targets, interval {:?}",
            view.targets().len(),
            self.probe_interval()
        );

        // Subscribe before spawning so an early shutdown is not missed.
        let probe = tokio::spawn(self.clone().run_probe_loop(self.stop.subscribe()));
        let watch = tokio::spawn(self.clone().run_watch_loop(self.stop.subscribe()));
        self.tasks().extend([probe, watch]);
    }

    /// Stop both loops and wait for them. An in-flight cycle finishes first.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(());
        tracing::info!("Scheduler: Shutdown requested");

        let handles = std::mem::take(&mut *self.tasks());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler: Loop task failed: {}", e);
            }
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current period of the probe loop.
    pub fn probe_interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase_tx.borrow()
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    async fn run_probe_loop(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval_rx = self.interval_tx.subscribe();
        let mut ticker = new_ticker(*interval_rx.borrow_and_update(), Instant::now());

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *interval_rx.borrow_and_update();
                    ticker = new_ticker(period, Instant::now() + period);
                    tracing::info!("Scheduler: Probe loop rescheduled every {:?}", period);
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        tracing::info!("Scheduler: Probe loop stopped");
    }

    async fn run_watch_loop(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let mut ticker = new_ticker(self.watch_interval, Instant::now() + self.watch_interval);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => {
                    self.check_config().await;
                }
            }
        }

        tracing::info!("Scheduler: Config watch loop stopped");
    }

    /// Reload the configuration once.
    ///
    /// On a structural change the registry is swapped, an out-of-band
    /// cycle runs against the new targets and the probe loop is
    /// rescheduled with the new interval. Returns whether it changed.
    pub async fn check_config(&self) -> bool {
        let snapshot = match self.loader.load() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Scheduler: Failed to reload config, keeping previous: {}", e);
                return false;
            }
        };

        if !self.registry.replace_if_changed(snapshot) {
            return false;
        }

        let view = self.registry.current();
        tracing::info!(
            "Scheduler: Configuration changed, now {} targets",
            view.targets().len()
        );

        self.run_cycle().await;
        self.interval_tx.send_replace(view.snapshot().check_interval());
        true
    }

    /// Run one full probe cycle: probe, record, correlate, prune.
    ///
    /// Failures in any stage are logged; the cycle always completes.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut last_timestamp = self.cycle_lock.lock().await;
        let view = self.registry.current();
        let snapshot = view.snapshot();
        let mut report = CycleReport::default();

        let now = Utc::now().timestamp_millis();
        let timestamp = now.max(*last_timestamp);

        self.phase_tx.send_replace(CyclePhase::Probing);
        let outcomes = self.probe_all(&view).await;
        report.probed = outcomes.len();

        self.phase_tx.send_replace(CyclePhase::Recording);
        let batch: Vec<ServiceSample> = view
            .targets()
            .iter()
            .zip(outcomes)
            .map(|(target, outcome)| ServiceSample {
                url: target.url.clone(),
                status: outcome.status,
                response_time: outcome.latency_ms,
                timestamp,
            })
            .collect();

        report.recorded = match self.store.append_samples(&batch) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Scheduler: Failed to record samples: {}", e);
                0
            }
        };
        if report.recorded > 0 {
            *last_timestamp = timestamp;

            self.phase_tx.send_replace(CyclePhase::Correlating);
            let alerts = self.correlator.evaluate(&view, &batch);
            report.alerts = alerts.len();

            if snapshot.mail.enabled {
                for alert in alerts {
                    self.dispatcher.dispatch(alert);
                }
            } else if !alerts.is_empty() {
                tracing::info!("Scheduler: Notifications disabled, {} alerts not sent", alerts.len());
            }
        }

        self.phase_tx.send_replace(CyclePhase::Pruning);
        report.pruned = match self.retention.prune(now, snapshot.retention()) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Scheduler: Retention pass failed: {}", e);
                0
            }
        };

        self.phase_tx.send_replace(CyclePhase::Idle);
        tracing::debug!(
            probed = report.probed,
            recorded = report.recorded,
            alerts = report.alerts,
            pruned = report.pruned,
            "Probe cycle complete"
        );

        report
    }

    /// Probe every target concurrently and wait for all of them.
    /// Outcomes are returned in target order.
    async fn probe_all(&self, view: &RegistryView) -> Vec<ProbeOutcome> {
        let snapshot = view.snapshot();
        let timeout = snapshot.probe_timeout();
        let semaphore = Arc::new(Semaphore::new(snapshot.probe_concurrency()));
        let mut set = JoinSet::new();

        for (i, target) in view.targets().iter().enumerate() {
            let prober = self.prober.clone();
            let semaphore = semaphore.clone();
            let target = target.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = tokio::time::timeout(timeout + PROBE_GRACE, prober.probe(&target, timeout))
                    .await
                    .unwrap_or_else(|_| ProbeOutcome::offline());
                tracing::debug!("Probe {} -> {:?}", target.url, outcome);
                (i, outcome)
            });
        }

        let mut outcomes = vec![ProbeOutcome::offline(); view.targets().len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, outcome)) => outcomes[i] = outcome,
                Err(e) => tracing::error!("Scheduler: Probe task failed: {}", e),
            }
        }

        outcomes
    }
}

fn new_ticker(period: Duration, start: Instant) -> tokio::time::Interval {
    // interval_at panics on a zero period.
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
