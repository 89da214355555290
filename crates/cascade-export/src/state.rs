//! Shared exporter state: endpoint selection plus the client bound to it.
//!
//! Both live under one lock so a reader never sees an index without its
//! matching client. The export coordinator writes on failure (failover)
//! and the health prober writes on recovery (failback); last writer wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cascade_health::FailbackTarget;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ExporterFactory, MetricExporter};
use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::ExportResult;

struct Selection {
    endpoints: EndpointSet,
    client: Arc<dyn MetricExporter>,
}

/// Endpoint selection and its bound exporter client, shared between the
/// export coordinator and the health prober.
pub struct ExporterState {
    selection: Mutex<Selection>,
    factory: Arc<dyn ExporterFactory>,
    failovers: AtomicU64,
    failbacks: AtomicU64,
}

impl ExporterState {
    /// Bind the initial client to the set's current (local) endpoint.
    pub fn new(endpoints: EndpointSet, factory: Arc<dyn ExporterFactory>) -> ExportResult<Self> {
        let client = factory.build(endpoints.current())?;
        Ok(Self {
            selection: Mutex::new(Selection { endpoints, client }),
            factory,
            failovers: AtomicU64::new(0),
            failbacks: AtomicU64::new(0),
        })
    }

    /// The client for the current selection.
    pub async fn client(&self) -> Arc<dyn MetricExporter> {
        Arc::clone(&self.selection.lock().await.client)
    }

    /// The selected endpoint.
    pub async fn current_endpoint(&self) -> Endpoint {
        self.selection.lock().await.endpoints.current().clone()
    }

    /// The endpoint failback restores.
    pub async fn local_endpoint(&self) -> Endpoint {
        self.selection.lock().await.endpoints.local().clone()
    }

    /// Whether the local endpoint is selected.
    pub async fn is_local(&self) -> bool {
        self.selection.lock().await.endpoints.is_local()
    }

    /// Advance past `failed` to the next alternate and rebind the client.
    ///
    /// A no-op if `failed` is no longer the current selection, or if no
    /// alternate is left. Returns the new endpoint when the selection moved.
    pub async fn fail_over(&self, failed: &Endpoint) -> Option<Endpoint> {
        let mut selection = self.selection.lock().await;
        if selection.endpoints.current() != failed {
            debug!(%failed, current = %selection.endpoints.current(), "stale failure, selection already moved");
            return None;
        }

        let mut next = selection.endpoints.clone();
        let Some(target) = next.advance_on_failure().cloned() else {
            warn!(endpoint = %failed, "no alternate collector left, staying on current endpoint");
            return None;
        };

        let client = match self.factory.build(&target) {
            Ok(client) => client,
            Err(e) => {
                warn!(endpoint = %target, error = %e, "failed to build exporter for alternate");
                return None;
            }
        };

        let old = std::mem::replace(&mut selection.client, client);
        selection.endpoints = next;
        drop(selection);

        old.shutdown().await;
        self.failovers.fetch_add(1, Ordering::Relaxed);
        info!(from = %failed, to = %target, "failover to remote endpoint");
        Some(target)
    }

    /// Restore the local endpoint and rebind the client to it.
    ///
    /// Returns `true` if the selection moved; repeated calls while local
    /// are no-ops.
    pub async fn fail_back(&self) -> bool {
        let mut selection = self.selection.lock().await;
        if selection.endpoints.is_local() {
            return false;
        }

        let local = selection.endpoints.local().clone();
        let client = match self.factory.build(&local) {
            Ok(client) => client,
            Err(e) => {
                warn!(endpoint = %local, error = %e, "failed to build exporter for local endpoint");
                return false;
            }
        };

        let from = selection.endpoints.current().clone();
        selection.endpoints.restore_local();
        let old = std::mem::replace(&mut selection.client, client);
        drop(selection);

        old.shutdown().await;
        self.failbacks.fetch_add(1, Ordering::Relaxed);
        info!(%from, to = %local, "failback to local endpoint");
        true
    }

    /// Failovers that moved the selection.
    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    /// Failbacks that restored the local endpoint.
    pub fn failback_count(&self) -> u64 {
        self.failbacks.load(Ordering::Relaxed)
    }

    /// Close the currently bound client.
    pub async fn shutdown(&self) {
        let client = self.client().await;
        client.shutdown().await;
    }
}

impl FailbackTarget for ExporterState {
    async fn is_failed_over(&self) -> bool {
        !self.is_local().await
    }

    async fn restore_local(&self) -> bool {
        self.fail_back().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCollector;

    fn state(list: &str, host: &str) -> (ExporterState, Arc<FakeCollector>) {
        let collector = FakeCollector::new();
        let endpoints = EndpointSet::from_list(list, host, 4317).unwrap();
        let state = ExporterState::new(endpoints, collector.factory()).unwrap();
        (state, collector)
    }

    #[tokio::test]
    async fn starts_bound_to_local() {
        let (state, collector) = state("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        assert!(state.is_local().await);
        assert_eq!(state.client().await.endpoint().address(), "10.0.0.1:4317");
        assert_eq!(collector.builds(), vec!["10.0.0.1:4317"]);
    }

    #[tokio::test]
    async fn failover_rebinds_client() {
        let (state, collector) = state("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        let local = state.current_endpoint().await;

        let moved = state.fail_over(&local).await.unwrap();
        assert_eq!(moved.address(), "10.0.0.2:4317");
        assert_eq!(state.client().await.endpoint().address(), "10.0.0.2:4317");
        assert!(!state.is_local().await);
        assert_eq!(state.failover_count(), 1);
        assert_eq!(collector.builds(), vec!["10.0.0.1:4317", "10.0.0.2:4317"]);
        assert_eq!(collector.closed(), vec!["10.0.0.1:4317"]);
    }

    #[tokio::test]
    async fn failover_without_alternate_is_noop() {
        let (state, collector) = state("10.0.0.1:4317", "10.0.0.1");
        let local = state.current_endpoint().await;

        assert!(state.fail_over(&local).await.is_none());
        assert!(state.is_local().await);
        assert_eq!(state.failover_count(), 0);
        assert_eq!(collector.builds().len(), 1);
    }

    #[tokio::test]
    async fn stale_failure_does_not_move_selection() {
        let (state, _) = state("10.0.0.1:4317,10.0.0.2:4317,10.0.0.3:4317", "10.0.0.1");
        let local = state.current_endpoint().await;
        state.fail_over(&local).await;
        state.fail_back().await;

        // A failure against 10.0.0.2 reported after failback is ignored.
        let stale = EndpointSet::from_list("10.0.0.2:4317", "10.0.0.1", 4317).unwrap();
        assert!(state.fail_over(&stale.candidates()[0]).await.is_none());
        assert!(state.is_local().await);
    }

    #[tokio::test]
    async fn failback_is_idempotent() {
        let (state, _) = state("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        assert!(!state.fail_back().await);

        let local = state.current_endpoint().await;
        state.fail_over(&local).await;
        assert!(state.is_failed_over().await);

        assert!(state.restore_local().await);
        assert_eq!(state.client().await.endpoint().address(), "10.0.0.1:4317");
        assert!(!state.restore_local().await);
        assert_eq!(state.failback_count(), 1);
    }
}
