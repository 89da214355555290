//! cascade-metrics: in-process instruments and snapshots.
//!
//! Application code records into a [`MetricRegistry`]; the export engine
//! pulls a [`MetricSnapshot`] from it once per cycle through the
//! [`SnapshotProvider`] trait.
//!
//! # Architecture
//!
//! ```text
//! MetricRegistry
//!   ├── record_counter() / record_histogram() / ... ← instrumented call sites
//!   ├── DashMap<(tag, name, kind), Arc<Instrument>>  (get-or-insert)
//!   │     └── Instrument → per-label-set series
//!   └── snapshot() → MetricSnapshot (cumulative, immutable)
//! ```

pub mod attributes;
pub mod error;
pub mod instrument;
pub mod registry;
pub mod snapshot;

pub use attributes::AttributeSet;
pub use error::{MetricsError, MetricsResult};
pub use instrument::{GaugeObserver, Instrument, InstrumentKind, DEFAULT_HISTOGRAM_BOUNDS};
pub use registry::{MetricRegistry, RecordOptions};
pub use snapshot::{
    HistogramPoint, MetricData, MetricReading, MetricSnapshot, NumberPoint, NumberValue,
    SnapshotProvider,
};
