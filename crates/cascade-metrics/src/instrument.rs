//! Instrument variants and their in-memory aggregation state.
//!
//! Each series (one label set of one instrument) lives in a `DashMap`
//! entry, so recording only takes a short shard lock and never awaits.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::warn;

use crate::attributes::AttributeSet;
use crate::snapshot::{HistogramPoint, MetricData, MetricReading, NumberPoint, NumberValue};

/// Explicit bucket bounds used by every histogram.
pub const DEFAULT_HISTOGRAM_BOUNDS: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    FloatCounter,
    UpDownCounter,
    Histogram,
    Gauge,
}

/// Identity of an instrument: one instance exists per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentId {
    pub scope: String,
    pub name: String,
    pub kind: InstrumentKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentMeta {
    pub unit: Option<String>,
    pub description: Option<String>,
}

/// Callback polled at snapshot time for gauge readings.
pub type GaugeCallback = Arc<dyn Fn(&mut GaugeObserver) + Send + Sync>;

/// Collects the values a gauge callback reports during one snapshot.
pub struct GaugeObserver {
    name: String,
    points: Vec<NumberPoint>,
}

impl GaugeObserver {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            points: Vec::new(),
        }
    }

    /// Report one value. Malformed labels drop the observation.
    pub fn observe<S: AsRef<str>>(&mut self, value: f64, attributes: &[S]) {
        match AttributeSet::parse(attributes) {
            Ok(attributes) => self.points.push(NumberPoint {
                attributes,
                value: NumberValue::Float(value),
            }),
            Err(e) => warn!(gauge = %self.name, error = %e, "gauge observation dropped"),
        }
    }
}

/// A value handed to [`Instrument::record`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Int(u64),
    Float(f64),
}

#[derive(Debug, Clone)]
struct HistogramState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    bucket_counts: Vec<u64>,
}

impl HistogramState {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            bucket_counts: vec![0; DEFAULT_HISTOGRAM_BOUNDS.len() + 1],
        }
    }

    fn record(&mut self, value: f64) {
        // Bucket i holds (bounds[i-1], bounds[i]]; the last one is unbounded.
        let idx = DEFAULT_HISTOGRAM_BOUNDS
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(DEFAULT_HISTOGRAM_BOUNDS.len());
        self.bucket_counts[idx] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

enum Aggregation {
    IntSum(DashMap<AttributeSet, u64>),
    FloatSum(DashMap<AttributeSet, f64>),
    Histogram(DashMap<AttributeSet, HistogramState>),
    Gauge(RwLock<GaugeCallback>),
}

/// A named, typed accumulator of recorded measurements.
pub struct Instrument {
    id: InstrumentId,
    meta: InstrumentMeta,
    aggregation: Aggregation,
}

impl Instrument {
    pub(crate) fn new(id: InstrumentId, meta: InstrumentMeta) -> Self {
        let aggregation = match id.kind {
            InstrumentKind::Counter => Aggregation::IntSum(DashMap::new()),
            InstrumentKind::FloatCounter | InstrumentKind::UpDownCounter => {
                Aggregation::FloatSum(DashMap::new())
            }
            InstrumentKind::Histogram => Aggregation::Histogram(DashMap::new()),
            InstrumentKind::Gauge => {
                let noop: GaugeCallback = Arc::new(|_: &mut GaugeObserver| {});
                Aggregation::Gauge(RwLock::new(noop))
            }
        };
        Self {
            id,
            meta,
            aggregation,
        }
    }

    pub fn id(&self) -> &InstrumentId {
        &self.id
    }

    pub fn meta(&self) -> &InstrumentMeta {
        &self.meta
    }

    pub fn kind(&self) -> InstrumentKind {
        self.id.kind
    }

    /// Fold one measurement into the series for `attributes`.
    ///
    /// Gauges hold no values; recording into one is a no-op.
    pub fn record(&self, value: Measurement, attributes: AttributeSet) {
        match (&self.aggregation, value) {
            (Aggregation::IntSum(series), Measurement::Int(v)) => {
                let mut slot = series.entry(attributes).or_insert(0);
                *slot = slot.saturating_add(v);
            }
            (Aggregation::IntSum(series), Measurement::Float(v)) => {
                let mut slot = series.entry(attributes).or_insert(0);
                *slot = slot.saturating_add(v as u64);
            }
            (Aggregation::FloatSum(series), value) => {
                *series.entry(attributes).or_insert(0.0) += measurement_f64(value);
            }
            (Aggregation::Histogram(series), value) => {
                series
                    .entry(attributes)
                    .or_insert_with(HistogramState::new)
                    .record(measurement_f64(value));
            }
            (Aggregation::Gauge(_), _) => {}
        }
    }

    /// Swap the callback of a gauge instrument.
    pub(crate) fn set_callback(&self, callback: GaugeCallback) {
        if let Aggregation::Gauge(slot) = &self.aggregation {
            let mut guard = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = callback;
        }
    }

    /// Current reading, or `None` if nothing has been recorded or observed.
    pub(crate) fn read(&self) -> Option<MetricReading> {
        let data = match &self.aggregation {
            Aggregation::IntSum(series) => MetricData::Sum {
                monotonic: true,
                points: number_points(series, |v| NumberValue::Int(*v)),
            },
            Aggregation::FloatSum(series) => MetricData::Sum {
                monotonic: self.id.kind == InstrumentKind::FloatCounter,
                points: number_points(series, |v| NumberValue::Float(*v)),
            },
            Aggregation::Histogram(series) => {
                let mut points: Vec<HistogramPoint> = series
                    .iter()
                    .map(|entry| {
                        let state = entry.value();
                        HistogramPoint {
                            attributes: entry.key().clone(),
                            count: state.count,
                            sum: state.sum,
                            min: state.min,
                            max: state.max,
                            bucket_counts: state.bucket_counts.clone(),
                        }
                    })
                    .collect();
                points.sort_by(|a, b| a.attributes.cmp(&b.attributes));
                MetricData::Histogram {
                    bounds: DEFAULT_HISTOGRAM_BOUNDS.to_vec(),
                    points,
                }
            }
            Aggregation::Gauge(slot) => {
                let callback = slot
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                let mut observer = GaugeObserver::new(&self.id.name);
                // A panicking callback drops this gauge from the snapshot only.
                if panic::catch_unwind(AssertUnwindSafe(|| callback(&mut observer))).is_err() {
                    warn!(scope = %self.id.scope, gauge = %self.id.name, "gauge callback panicked, skipping");
                    return None;
                }
                MetricData::Gauge {
                    points: observer.points,
                }
            }
        };

        let empty = match &data {
            MetricData::Sum { points, .. } | MetricData::Gauge { points } => points.is_empty(),
            MetricData::Histogram { points, .. } => points.is_empty(),
        };
        if empty {
            return None;
        }

        Some(MetricReading {
            scope: self.id.scope.clone(),
            name: self.id.name.clone(),
            unit: self.meta.unit.clone(),
            description: self.meta.description.clone(),
            data,
        })
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

fn measurement_f64(value: Measurement) -> f64 {
    match value {
        Measurement::Int(v) => v as f64,
        Measurement::Float(v) => v,
    }
}

fn number_points<V>(
    series: &DashMap<AttributeSet, V>,
    to_value: impl Fn(&V) -> NumberValue,
) -> Vec<NumberPoint> {
    let mut points: Vec<NumberPoint> = series
        .iter()
        .map(|entry| NumberPoint {
            attributes: entry.key().clone(),
            value: to_value(entry.value()),
        })
        .collect();
    points.sort_by(|a, b| a.attributes.cmp(&b.attributes));
    points
}
