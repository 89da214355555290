//! In-process exporter doubles for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cascade_metrics::MetricSnapshot;
use tokio::sync::Notify;

use crate::client::{ExporterFactory, MetricExporter};
use crate::endpoint::Endpoint;
use crate::error::{ExportError, ExportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Succeed,
    Fail,
    /// Block until `FakeCollector::release` is called, then succeed.
    Hold,
    /// Never complete.
    Stall,
}

/// Records builds and exports per endpoint address.
#[derive(Default)]
pub(crate) struct FakeCollector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    builds: Mutex<Vec<String>>,
    exports: Mutex<Vec<(String, usize)>>,
    closed: Mutex<Vec<String>>,
    gate: Notify,
}

impl FakeCollector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn factory(self: &Arc<Self>) -> Arc<dyn ExporterFactory> {
        Arc::new(FakeFactory(Arc::clone(self)))
    }

    pub(crate) fn set(&self, address: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    pub(crate) fn release(&self) {
        self.gate.notify_one();
    }

    pub(crate) fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    /// Endpoint addresses that received an export call, in order.
    pub(crate) fn exports(&self) -> Vec<String> {
        self.exports
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Metric count of each exported batch, in order.
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.exports
            .lock()
            .unwrap()
            .iter()
            .map(|(_, n)| *n)
            .collect()
    }

    pub(crate) fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    fn behavior(&self, address: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(Behavior::Succeed)
    }
}

struct FakeFactory(Arc<FakeCollector>);

impl ExporterFactory for FakeFactory {
    fn build(&self, endpoint: &Endpoint) -> ExportResult<Arc<dyn MetricExporter>> {
        self.0
            .builds
            .lock()
            .unwrap()
            .push(endpoint.address().to_string());
        Ok(Arc::new(FakeExporter {
            endpoint: endpoint.clone(),
            collector: Arc::clone(&self.0),
        }))
    }
}

struct FakeExporter {
    endpoint: Endpoint,
    collector: Arc<FakeCollector>,
}

#[tonic::async_trait]
impl MetricExporter for FakeExporter {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn export(&self, snapshot: &MetricSnapshot) -> ExportResult<()> {
        let address = self.endpoint.address().to_string();
        self.collector
            .exports
            .lock()
            .unwrap()
            .push((address.clone(), snapshot.len()));

        match self.collector.behavior(&address) {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(ExportError::Unavailable("connection refused".to_string())),
            Behavior::Hold => {
                self.collector.gate.notified().await;
                Ok(())
            }
            Behavior::Stall => std::future::pending().await,
        }
    }

    async fn shutdown(&self) {
        self.collector
            .closed
            .lock()
            .unwrap()
            .push(self.endpoint.address().to_string());
    }
}
