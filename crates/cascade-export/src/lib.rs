//! cascade-export: periodic OTLP export with endpoint failover and failback.
//!
//! # Architecture
//!
//! ```text
//! MetricReporter
//!   ├── MetricRegistry                     ← record_*() from application code
//!   └── ExportEngine (lifecycle: not-started → running → shutting-down → stopped)
//!         ├── ExportCoordinator::run       export timer, one cycle per tick
//!         │     ├── in-flight flag (CAS)   overlapping ticks are dropped
//!         │     ├── SnapshotProvider::collect()
//!         │     └── MetricExporter::export() → on Err: ExporterState::fail_over()
//!         ├── HealthProber::run            probe timer, only while failed over
//!         │     └── GET /status on local → ExporterState::fail_back()
//!         └── ExporterState                one lock over (EndpointSet, client)
//! ```
//!
//! Failures never retry within a cycle; the next tick goes to the endpoint
//! the failover selected.

pub mod client;
pub mod coordinator;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod otlp;
pub mod reporter;
pub mod state;

#[cfg(test)]
mod testing;

pub use client::{ExporterFactory, MetricExporter, OtlpExporterFactory, OtlpGrpcExporter};
pub use coordinator::{CycleOutcome, CycleStats, ExportCoordinator};
pub use endpoint::{Endpoint, EndpointSet};
pub use engine::{ExportEngine, ExportEngineBuilder, LifecycleState, ShutdownReport};
pub use error::{EngineError, EngineResult, ExportError, ExportResult};
pub use otlp::ResourceIdentity;
pub use reporter::MetricReporter;
pub use state::ExporterState;
