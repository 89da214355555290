//! Export cycle coordinator: one collect + export attempt per tick.
//!
//! At most one attempt is in flight process-wide. A tick that finds an
//! attempt still running is dropped, never queued. A failed attempt is not
//! retried within the cycle: the selection fails over and the next tick
//! goes to the new endpoint.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_metrics::SnapshotProvider;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::state::ExporterState;

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Batch accepted by the collector.
    Exported { endpoint: String, metrics: usize },
    /// Nothing to send; no network call was made.
    Empty,
    /// The collector could not be reached or refused the batch.
    Failed { endpoint: String, error: ExportError },
    /// Collecting the snapshot panicked; nothing was sent.
    CollectFailed { reason: String },
    /// Another attempt was still in flight; this one was dropped.
    Busy,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Exported { .. } | CycleOutcome::Empty)
    }
}

/// Running totals of cycle outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub exported: u64,
    pub empty: u64,
    pub failed: u64,
    pub dropped: u64,
    pub failovers: u64,
    pub failbacks: u64,
}

pub struct ExportCoordinator {
    provider: Arc<dyn SnapshotProvider>,
    state: Arc<ExporterState>,
    in_flight: AtomicBool,
    idle: Notify,
    exported: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Holds the in-flight flag; releasing it wakes anyone waiting for idle.
struct InFlightGuard<'a> {
    coordinator: &'a ExportCoordinator,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(coordinator: &'a ExportCoordinator) -> Option<Self> {
        coordinator
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { coordinator })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.in_flight.store(false, Ordering::Release);
        self.coordinator.idle.notify_waiters();
    }
}

impl ExportCoordinator {
    pub fn new(provider: Arc<dyn SnapshotProvider>, state: Arc<ExporterState>) -> Self {
        Self {
            provider,
            state,
            in_flight: AtomicBool::new(false),
            idle: Notify::new(),
            exported: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Run one collect + export cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(self) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("exporter busy, dropping cycle");
            return CycleOutcome::Busy;
        };

        let snapshot = match panic::catch_unwind(AssertUnwindSafe(|| self.provider.collect())) {
            Ok(snapshot) => snapshot,
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let reason = panic_message(payload.as_ref());
                warn!(%reason, "metric collection panicked, skipping cycle");
                return CycleOutcome::CollectFailed { reason };
            }
        };
        if snapshot.is_empty() {
            self.empty.fetch_add(1, Ordering::Relaxed);
            debug!("no metric data to export, skipping");
            return CycleOutcome::Empty;
        }

        let client = self.state.client().await;
        let endpoint = client.endpoint().clone();
        match client.export(&snapshot).await {
            Ok(()) => {
                self.exported.fetch_add(1, Ordering::Relaxed);
                debug!(%endpoint, metrics = snapshot.len(), "export succeeded");
                CycleOutcome::Exported {
                    endpoint: endpoint.to_string(),
                    metrics: snapshot.len(),
                }
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%endpoint, %error, "export failed");
                self.state.fail_over(&endpoint).await;
                CycleOutcome::Failed {
                    endpoint: endpoint.to_string(),
                    error,
                }
            }
        }
    }

    /// Synchronous equivalent of one cycle, for callers that need the result.
    pub async fn force_flush(&self) -> CycleOutcome {
        self.run_cycle().await
    }

    pub fn is_exporting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no attempt is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_exporting() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> CycleStats {
        CycleStats {
            exported: self.exported.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failovers: self.state.failover_count(),
            failbacks: self.state.failback_count(),
        }
    }

    /// Tick every `interval` until shutdown is signalled.
    ///
    /// Each cycle runs as its own task so a stalled export never holds up
    /// the timer; overlapping ticks are dropped by the in-flight flag.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?interval, "export loop started");

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let coordinator = Arc::clone(&self);
                    tokio::spawn(async move {
                        coordinator.run_cycle().await;
                    });
                }
                _ = shutdown.changed() => {
                    info!("export loop shutting down");
                    break;
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
