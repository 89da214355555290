//! Export engine lifecycle.
//!
//! Owns the two background timers (export cycle and health probe) and the
//! shared exporter state. The lifecycle only moves forward:
//! not-started → running → shutting-down → stopped. A stopped engine is
//! never restarted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cascade_core::{resolve_local_host, CollectorConfig};
use cascade_health::{HealthProber, HttpStatusCheck};
use cascade_metrics::SnapshotProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{ExporterFactory, OtlpExporterFactory};
use crate::coordinator::{CycleOutcome, CycleStats, ExportCoordinator};
use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::{EngineError, EngineResult};
use crate::otlp::ResourceIdentity;
use crate::state::ExporterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// Result of [`ExportEngine::shutdown`].
///
/// Shutdown always completes; a timed-out final flush is reported here
/// rather than raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The final flush reached a collector (or had nothing to send).
    pub flushed: bool,
    /// The final flush did not finish within the shutdown timeout.
    pub timed_out: bool,
    /// The bound exporter client was closed.
    pub exporter_closed: bool,
}

impl ShutdownReport {
    pub fn is_success(&self) -> bool {
        self.flushed && !self.timed_out && self.exporter_closed
    }
}

/// Builder for [`ExportEngine`]. Settings not given here come from the
/// collector config.
pub struct ExportEngineBuilder {
    config: CollectorConfig,
    host: Option<String>,
    interval: Option<Duration>,
    probe_schedule: Option<(Duration, Duration)>,
    shutdown_timeout: Option<Duration>,
    factory: Option<Arc<dyn ExporterFactory>>,
}

impl ExportEngineBuilder {
    /// This host's address, used to pick the local endpoint. Resolved from
    /// the environment when not set.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn probe_schedule(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.probe_schedule = Some((initial_delay, interval));
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Replace the OTLP/gRPC exporter factory.
    pub fn factory(mut self, factory: Arc<dyn ExporterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the engine and bind the initial client to the local endpoint.
    ///
    /// Must be called inside a Tokio runtime when the default OTLP factory
    /// is used.
    pub fn build(self, provider: Arc<dyn SnapshotProvider>) -> EngineResult<ExportEngine> {
        let config = self.config;
        config.validate()?;

        let host = self.host.unwrap_or_else(resolve_local_host);
        let endpoints = EndpointSet::new(config.endpoints(), &host, config.default_port)?;
        let local = endpoints.local().clone();

        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(OtlpExporterFactory::new(
                config.timeout(),
                ResourceIdentity::from_config(&config, &host),
            )),
        };

        let state = Arc::new(ExporterState::new(endpoints, factory)?);
        let coordinator = Arc::new(ExportCoordinator::new(provider, Arc::clone(&state)));
        let (probe_delay, probe_interval) = self
            .probe_schedule
            .unwrap_or((config.health.initial_delay(), config.health.interval()));

        info!(
            %host,
            local = %local,
            candidates = config.endpoints().count(),
            "export engine configured"
        );

        Ok(ExportEngine {
            interval: self.interval.unwrap_or_else(|| config.interval()),
            probe_delay,
            probe_interval,
            shutdown_timeout: self
                .shutdown_timeout
                .unwrap_or_else(|| config.shutdown_timeout()),
            config,
            local,
            state,
            coordinator,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::NotStarted,
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
        })
    }
}

struct Lifecycle {
    state: LifecycleState,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the export loop and the health prober for one collector config.
///
/// Shared by reference; every method takes `&self`.
pub struct ExportEngine {
    config: CollectorConfig,
    local: Endpoint,
    interval: Duration,
    probe_delay: Duration,
    probe_interval: Duration,
    shutdown_timeout: Duration,
    state: Arc<ExporterState>,
    coordinator: Arc<ExportCoordinator>,
    lifecycle: Mutex<Lifecycle>,
}

impl ExportEngine {
    /// Start configuring an engine; see [`ExportEngineBuilder`].
    pub fn builder(config: CollectorConfig) -> ExportEngineBuilder {
        ExportEngineBuilder {
            config,
            host: None,
            interval: None,
            probe_schedule: None,
            shutdown_timeout: None,
            factory: None,
        }
    }

    /// Spawn the export loop and the health prober.
    ///
    /// Starting a running engine is a no-op; starting a stopped one fails.
    pub fn start(&self) -> EngineResult<()> {
        let mut lifecycle = self.lock_lifecycle();
        match lifecycle.state {
            LifecycleState::Running => return Ok(()),
            LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                return Err(EngineError::AlreadyStopped);
            }
            LifecycleState::NotStarted => {}
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let export_loop = tokio::spawn(
            Arc::clone(&self.coordinator).run(self.interval, shutdown_rx.clone()),
        );

        let health = &self.config.health;
        let check = HttpStatusCheck::new(
            self.local.host(),
            health.port,
            &health.path,
            health.timeout(),
        );
        let prober = HealthProber::new(
            check,
            Arc::clone(&self.state),
            self.probe_delay,
            self.probe_interval,
        );
        let probe_loop = tokio::spawn(prober.run(shutdown_rx));

        lifecycle.shutdown_tx = Some(shutdown_tx);
        lifecycle.tasks = vec![export_loop, probe_loop];
        lifecycle.state = LifecycleState::Running;

        info!(
            local = %self.local,
            interval = ?self.interval,
            probe_interval = ?self.probe_interval,
            "export engine started"
        );
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lock_lifecycle().state
    }

    /// Endpoint selection shared with the coordinator and the prober.
    pub fn exporter_state(&self) -> &Arc<ExporterState> {
        &self.state
    }

    /// The endpoint the next export goes to.
    pub async fn current_endpoint(&self) -> Endpoint {
        self.state.current_endpoint().await
    }

    /// The endpoint the prober checks and failback returns to.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Export and failover counters so far.
    pub fn stats(&self) -> CycleStats {
        self.coordinator.stats()
    }

    /// Run one export cycle now and return its outcome.
    pub async fn force_flush(&self) -> CycleOutcome {
        self.coordinator.force_flush().await
    }

    /// Stop both timers, flush once within the shutdown timeout, then close
    /// the exporter.
    ///
    /// An export already in flight is not aborted; the final flush waits
    /// for it, bounded by the same timeout. Calling this again after the
    /// engine stopped returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let (shutdown_tx, tasks) = {
            let mut lifecycle = self.lock_lifecycle();
            match lifecycle.state {
                LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                    return ShutdownReport {
                        flushed: false,
                        timed_out: false,
                        exporter_closed: false,
                    };
                }
                LifecycleState::NotStarted | LifecycleState::Running => {}
            }
            lifecycle.state = LifecycleState::ShuttingDown;
            (
                lifecycle.shutdown_tx.take(),
                std::mem::take(&mut lifecycle.tasks),
            )
        };

        info!("export engine shutting down");
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        let coordinator = &self.coordinator;
        let final_flush = tokio::time::timeout(self.shutdown_timeout, async {
            coordinator.wait_idle().await;
            coordinator.force_flush().await
        })
        .await;

        let (flushed, timed_out) = match final_flush {
            Ok(outcome) => {
                if !outcome.is_success() {
                    warn!(?outcome, "final flush did not reach a collector");
                }
                (outcome.is_success(), false)
            }
            Err(_) => {
                warn!(timeout = ?self.shutdown_timeout, "final flush timed out, proceeding with shutdown");
                (false, true)
            }
        };

        self.state.shutdown().await;
        self.lock_lifecycle().state = LifecycleState::Stopped;

        let report = ShutdownReport {
            flushed,
            timed_out,
            exporter_closed: true,
        };
        info!(?report, "export engine stopped");
        report
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, FakeCollector};
    use cascade_metrics::{GaugeObserver, MetricRegistry, MetricSnapshot, RecordOptions};

    const LOCAL: &str = "10.0.0.1:4317";
    const REMOTE: &str = "10.0.0.2:4317";

    fn engine(collector: &Arc<FakeCollector>, registry: &Arc<MetricRegistry>) -> ExportEngine {
        let config = CollectorConfig {
            endpoint: format!("{LOCAL},{REMOTE}"),
            ..CollectorConfig::default()
        };
        ExportEngine::builder(config)
            .host("10.0.0.1")
            .interval(Duration::from_secs(30))
            // Keep the prober out of the way; nothing listens on 10.0.0.1.
            .probe_schedule(Duration::from_secs(3600), Duration::from_secs(3600))
            .shutdown_timeout(Duration::from_secs(5))
            .factory(collector.factory())
            .build(registry.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn build_binds_local_endpoint() {
        let collector = FakeCollector::new();
        let registry = Arc::new(MetricRegistry::new());
        let engine = engine(&collector, &registry);

        assert_eq!(engine.state(), LifecycleState::NotStarted);
        assert_eq!(engine.local_endpoint().address(), LOCAL);
        assert_eq!(engine.current_endpoint().await.address(), LOCAL);
        assert_eq!(collector.builds(), vec![LOCAL]);
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let config = CollectorConfig {
            interval_secs: 0,
            ..CollectorConfig::default()
        };
        let result = ExportEngine::builder(config)
            .host("10.0.0.1")
            .factory(FakeCollector::new().factory())
            .build(Arc::new(MetricRegistry::new()));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn exports_periodically_once_started() {
        let collector = FakeCollector::new();
        let registry = Arc::new(MetricRegistry::new());
        registry.increment("http", "requests_total");
        let engine = engine(&collector, &registry);

        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), LifecycleState::Running);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(collector.exports(), vec![LOCAL, LOCAL, LOCAL]);

        let report = engine.shutdown().await;
        assert!(report.is_success());
        assert_eq!(engine.state(), LifecycleState::Stopped);
        // The final flush is one more export.
        assert_eq!(collector.exports().len(), 4);
        assert_eq!(collector.closed(), vec![LOCAL]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_export_gives_partial_shutdown() {
        let collector = FakeCollector::new();
        collector.set(LOCAL, Behavior::Stall);
        let registry = Arc::new(MetricRegistry::new());
        registry.increment("http", "requests_total");
        let engine = engine(&collector, &registry);

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(engine.coordinator.is_exporting());

        let report = engine.shutdown().await;
        assert!(report.timed_out);
        assert!(!report.flushed);
        assert!(report.exporter_closed);
        assert!(!report.is_success());
        assert_eq!(engine.state(), LifecycleState::Stopped);

        // No cycles are scheduled after shutdown.
        let exports = collector.exports().len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(collector.exports().len(), exports);
    }

    fn exploding(_: &mut GaugeObserver) {
        panic!("sensor blew up");
    }

    struct PanickingProvider;

    impl SnapshotProvider for PanickingProvider {
        fn collect(&self) -> MetricSnapshot {
            panic!("collection failed");
        }
    }

    #[tokio::test]
    async fn panicking_gauge_does_not_break_shutdown() {
        let collector = FakeCollector::new();
        let registry = Arc::new(MetricRegistry::new());
        registry.increment("http", "requests_total");
        registry.register_gauge("sys", "temperature", RecordOptions::new(), exploding);
        let engine = engine(&collector, &registry);
        engine.start().unwrap();

        let report = engine.shutdown().await;
        assert!(report.exporter_closed);
        // The healthy counter still ships in the final flush.
        assert!(report.flushed);
        assert_eq!(collector.batch_sizes(), vec![1]);
        assert_eq!(engine.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn panicking_provider_still_closes_exporter() {
        let collector = FakeCollector::new();
        let config = CollectorConfig {
            endpoint: LOCAL.to_string(),
            ..CollectorConfig::default()
        };
        let engine = ExportEngine::builder(config)
            .host("10.0.0.1")
            .probe_schedule(Duration::from_secs(3600), Duration::from_secs(3600))
            .factory(collector.factory())
            .build(Arc::new(PanickingProvider))
            .unwrap();
        engine.start().unwrap();

        assert!(matches!(
            engine.force_flush().await,
            CycleOutcome::CollectFailed { .. }
        ));

        let report = engine.shutdown().await;
        assert!(!report.flushed);
        assert!(!report.timed_out);
        assert!(report.exporter_closed);
        assert_eq!(engine.state(), LifecycleState::Stopped);
        assert_eq!(collector.closed(), vec![LOCAL]);
        assert!(collector.exports().is_empty());
    }

    #[tokio::test]
    async fn stopped_engine_cannot_restart() {
        let collector = FakeCollector::new();
        let registry = Arc::new(MetricRegistry::new());
        let engine = engine(&collector, &registry);

        engine.start().unwrap();
        let first = engine.shutdown().await;
        // Empty registry: the final flush succeeds without a network call.
        assert!(first.is_success());
        assert!(collector.exports().is_empty());

        assert!(matches!(engine.start(), Err(EngineError::AlreadyStopped)));
        let second = engine.shutdown().await;
        assert!(!second.flushed);
        assert!(!second.exporter_closed);
    }

    #[tokio::test]
    async fn force_flush_fails_over() {
        let collector = FakeCollector::new();
        collector.set(LOCAL, Behavior::Fail);
        let registry = Arc::new(MetricRegistry::new());
        registry.increment("http", "requests_total");
        let engine = engine(&collector, &registry);

        assert!(!engine.force_flush().await.is_success());
        assert_eq!(engine.current_endpoint().await.address(), REMOTE);
        assert!(engine.force_flush().await.is_success());
        assert_eq!(engine.stats().failovers, 1);
    }
}
