//! Recording surface plus the engine that ships it.

use std::sync::Arc;

use cascade_core::CollectorConfig;
use cascade_metrics::MetricRegistry;

use crate::engine::{ExportEngine, ExportEngineBuilder, ShutdownReport};
use crate::error::EngineResult;

/// One registry and the running engine exporting it.
///
/// Application code records through [`registry`](Self::registry); the
/// engine snapshots the same registry on every tick.
pub struct MetricReporter {
    registry: Arc<MetricRegistry>,
    engine: ExportEngine,
}

impl MetricReporter {
    /// Build and start an engine from config, resolving the local host from
    /// the environment.
    pub fn start(config: CollectorConfig) -> EngineResult<Self> {
        Self::start_with(ExportEngine::builder(config))
    }

    /// Build and start an engine from a prepared builder.
    pub fn start_with(builder: ExportEngineBuilder) -> EngineResult<Self> {
        let registry = Arc::new(MetricRegistry::new());
        let engine = builder.build(registry.clone())?;
        engine.start()?;
        Ok(Self { registry, engine })
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &ExportEngine {
        &self.engine
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        self.engine.shutdown().await
    }
}
