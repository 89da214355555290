//! Point-in-time metric snapshots handed to the exporter.

use crate::attributes::AttributeSet;

/// Produces the readings for one export cycle.
///
/// Called once per cycle from the export loop, so implementations must be
/// cheap and must not block on I/O.
pub trait SnapshotProvider: Send + Sync {
    fn collect(&self) -> MetricSnapshot;
}

/// An immutable collection of instrument readings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    /// Start of the cumulative window (registry creation time).
    pub start_time_unix_nano: u64,
    /// When the snapshot was taken.
    pub time_unix_nano: u64,
    pub metrics: Vec<MetricReading>,
}

/// Readings of a single instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub scope: String,
    pub name: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub data: MetricData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricData {
    /// Cumulative sum. Counters are monotonic, up/down counters are not.
    Sum {
        monotonic: bool,
        points: Vec<NumberPoint>,
    },
    /// Last observed value per label set.
    Gauge { points: Vec<NumberPoint> },
    /// Cumulative explicit-bucket histogram.
    Histogram {
        bounds: Vec<f64>,
        points: Vec<HistogramPoint>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    Int(u64),
    Float(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            NumberValue::Int(v) => v as f64,
            NumberValue::Float(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberPoint {
    pub attributes: AttributeSet,
    pub value: NumberValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPoint {
    pub attributes: AttributeSet,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// One entry per bucket; `bounds.len() + 1` long.
    pub bucket_counts: Vec<u64>,
}

impl MetricSnapshot {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Total number of data points across all readings.
    pub fn point_count(&self) -> usize {
        self.metrics.iter().map(MetricReading::point_count).sum()
    }

    pub fn find(&self, scope: &str, name: &str) -> Option<&MetricReading> {
        self.metrics
            .iter()
            .find(|m| m.scope == scope && m.name == name)
    }
}

impl MetricReading {
    pub fn point_count(&self) -> usize {
        match &self.data {
            MetricData::Sum { points, .. } | MetricData::Gauge { points } => points.len(),
            MetricData::Histogram { points, .. } => points.len(),
        }
    }

    /// Number point for an exact label set, if this is a sum or gauge.
    pub fn number_point(&self, attributes: &AttributeSet) -> Option<NumberValue> {
        match &self.data {
            MetricData::Sum { points, .. } | MetricData::Gauge { points } => points
                .iter()
                .find(|p| &p.attributes == attributes)
                .map(|p| p.value),
            MetricData::Histogram { .. } => None,
        }
    }
}
