//! Failback prober: background task that watches the local collector.
//!
//! The prober only acts while the exporter is pointed away from the local
//! endpoint. A healthy probe restores the local endpoint; anything else is
//! logged and left for the next tick. It never moves the selection away
//! from local.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::checker::{LivenessCheck, ProbeResult};

/// The endpoint selection the prober restores on recovery.
pub trait FailbackTarget: Send + Sync + 'static {
    /// Whether the selection currently points away from the local endpoint.
    fn is_failed_over(&self) -> impl Future<Output = bool> + Send;

    /// Move the selection back to local. Returns `true` if it moved.
    fn restore_local(&self) -> impl Future<Output = bool> + Send;
}

/// What a single probe tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Already on the local endpoint; nothing probed.
    Skipped,
    /// Local endpoint healthy and selection restored.
    Restored,
    /// Local endpoint healthy but another writer already restored it.
    AlreadyRestored,
    /// Local endpoint still unavailable.
    StillDown(ProbeResult),
}

pub struct HealthProber<C, T> {
    check: C,
    target: Arc<T>,
    initial_delay: Duration,
    interval: Duration,
}

impl<C: LivenessCheck, T: FailbackTarget> HealthProber<C, T> {
    pub fn new(check: C, target: Arc<T>, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            check,
            target,
            initial_delay,
            interval,
        }
    }

    /// Run one probe tick.
    pub async fn probe_once(&self) -> ProbeOutcome {
        if !self.target.is_failed_over().await {
            return ProbeOutcome::Skipped;
        }

        match self.check.check().await {
            ProbeResult::Healthy => {
                if self.target.restore_local().await {
                    info!(target = %self.check.target(), "local collector healthy, failing back");
                    ProbeOutcome::Restored
                } else {
                    ProbeOutcome::AlreadyRestored
                }
            }
            result => {
                warn!(target = %self.check.target(), ?result, "local collector still unavailable");
                ProbeOutcome::StillDown(result)
            }
        }
    }

    /// Probe on a fixed schedule until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target = %self.check.target(),
            initial_delay = ?self.initial_delay,
            interval = ?self.interval,
            "health prober started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.probe_once().await;
                    debug!(?outcome, "health probe tick");
                }
                _ = shutdown.changed() => {
                    debug!("health prober shutting down");
                    break;
                }
            }
        }
    }
}
