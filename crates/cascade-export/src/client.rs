//! Exporter client: sends one batch to one endpoint.
//!
//! An exporter is bound to a single endpoint for its whole life. When the
//! selection changes the state builds a fresh one through an
//! [`ExporterFactory`]; a client bound to a dead endpoint is never reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_metrics::MetricSnapshot;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use prost::Message;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{ExportError, ExportResult};
use crate::otlp::{self, ResourceIdentity};

/// Sends metric batches to the endpoint it was built for.
#[tonic::async_trait]
pub trait MetricExporter: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    /// Export one batch. Transport faults come back as `Err`, never panic.
    async fn export(&self, snapshot: &MetricSnapshot) -> ExportResult<()>;

    /// Release transport resources. Later exports fail with `Closed`.
    async fn shutdown(&self);
}

/// Builds an exporter bound to a given endpoint.
pub trait ExporterFactory: Send + Sync {
    fn build(&self, endpoint: &Endpoint) -> ExportResult<Arc<dyn MetricExporter>>;
}

/// OTLP/gRPC `MetricsService/Export` client.
pub struct OtlpGrpcExporter {
    endpoint: Endpoint,
    client: MetricsServiceClient<Channel>,
    timeout: Duration,
    resource: Arc<ResourceIdentity>,
    closed: AtomicBool,
}

impl OtlpGrpcExporter {
    /// Create a lazily connecting client. Must run inside a Tokio runtime.
    pub fn connect_lazy(
        endpoint: &Endpoint,
        timeout: Duration,
        resource: Arc<ResourceIdentity>,
    ) -> ExportResult<Self> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint.uri())
            .map_err(|e| ExportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();

        Ok(Self {
            endpoint: endpoint.clone(),
            client: MetricsServiceClient::new(channel),
            timeout,
            resource,
            closed: AtomicBool::new(false),
        })
    }
}

#[tonic::async_trait]
impl MetricExporter for OtlpGrpcExporter {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn export(&self, snapshot: &MetricSnapshot) -> ExportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExportError::Closed);
        }

        let request = otlp::encode(snapshot, &self.resource);
        debug!(
            endpoint = %self.endpoint,
            metrics = snapshot.len(),
            bytes = request.encoded_len(),
            "exporting batch"
        );

        let mut client = self.client.clone();
        let response = match tokio::time::timeout(self.timeout, client.export(request)).await {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) => return Err(status_to_error(status, self.timeout)),
            Err(_) => return Err(ExportError::Timeout(self.timeout)),
        };

        if let Some(partial) = response.partial_success {
            if partial.rejected_data_points > 0 || !partial.error_message.is_empty() {
                warn!(
                    endpoint = %self.endpoint,
                    rejected = partial.rejected_data_points,
                    message = %partial.error_message,
                    "collector accepted batch partially"
                );
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.endpoint, "exporter closed");
        }
    }
}

/// Builds [`OtlpGrpcExporter`]s sharing one timeout and resource identity.
pub struct OtlpExporterFactory {
    timeout: Duration,
    resource: Arc<ResourceIdentity>,
}

impl OtlpExporterFactory {
    pub fn new(timeout: Duration, resource: ResourceIdentity) -> Self {
        Self {
            timeout,
            resource: Arc::new(resource),
        }
    }
}

impl ExporterFactory for OtlpExporterFactory {
    fn build(&self, endpoint: &Endpoint) -> ExportResult<Arc<dyn MetricExporter>> {
        let exporter =
            OtlpGrpcExporter::connect_lazy(endpoint, self.timeout, Arc::clone(&self.resource))?;
        Ok(Arc::new(exporter))
    }
}

fn status_to_error(status: tonic::Status, timeout: Duration) -> ExportError {
    match status.code() {
        tonic::Code::Unavailable => ExportError::Unavailable(status.message().to_string()),
        tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => ExportError::Timeout(timeout),
        code => ExportError::Rejected {
            code,
            message: status.message().to_string(),
        },
    }
}
