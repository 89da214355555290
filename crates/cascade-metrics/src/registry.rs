//! Metric registry: the recording surface used by instrumented code.
//!
//! Instruments are created on first use and cached per
//! (tag, name, kind). Creation goes through a single `DashMap` entry
//! operation, so concurrent first use converges on one instance.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::debug;

use crate::attributes::AttributeSet;
use crate::error::{MetricsError, MetricsResult};
use crate::instrument::{
    GaugeCallback, GaugeObserver, Instrument, InstrumentId, InstrumentKind, InstrumentMeta,
    Measurement,
};
use crate::snapshot::{MetricSnapshot, SnapshotProvider};

/// Optional metadata and labels for a record call.
///
/// Unit and description only apply when the call creates the instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOptions<'a> {
    pub unit: Option<&'a str>,
    pub description: Option<&'a str>,
    pub attributes: &'a [&'a str],
}

impl<'a> RecordOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(mut self, unit: &'a str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn description(mut self, description: &'a str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn attributes(mut self, attributes: &'a [&'a str]) -> Self {
        self.attributes = attributes;
        self
    }

    fn meta(&self) -> InstrumentMeta {
        InstrumentMeta {
            unit: self.unit.filter(|u| !u.is_empty()).map(str::to_string),
            description: self
                .description
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        }
    }
}

/// Process-wide store of instruments.
pub struct MetricRegistry {
    instruments: DashMap<InstrumentId, Arc<Instrument>>,
    start_time_unix_nano: u64,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            instruments: DashMap::new(),
            start_time_unix_nano: epoch_nanos(),
        }
    }

    /// Add one to an integer counter.
    pub fn increment(&self, tag: &str, name: &str) {
        self.instrument(tag, name, InstrumentKind::Counter, RecordOptions::default())
            .record(Measurement::Int(1), AttributeSet::empty());
    }

    /// Add `value` to a monotonic integer counter.
    pub fn record_counter(
        &self,
        tag: &str,
        name: &str,
        value: u64,
        opts: RecordOptions<'_>,
    ) -> MetricsResult<()> {
        let attributes = AttributeSet::parse(opts.attributes)?;
        self.instrument(tag, name, InstrumentKind::Counter, opts)
            .record(Measurement::Int(value), attributes);
        Ok(())
    }

    /// Add `value` to a monotonic float counter. Negative or NaN values are rejected.
    pub fn record_float_counter(
        &self,
        tag: &str,
        name: &str,
        value: f64,
        opts: RecordOptions<'_>,
    ) -> MetricsResult<()> {
        if value.is_nan() || value < 0.0 {
            return Err(MetricsError::InvalidIncrement {
                name: name.to_string(),
                value,
            });
        }
        let attributes = AttributeSet::parse(opts.attributes)?;
        self.instrument(tag, name, InstrumentKind::FloatCounter, opts)
            .record(Measurement::Float(value), attributes);
        Ok(())
    }

    /// Add a positive or negative delta to an up/down counter. NaN and
    /// infinities are rejected.
    pub fn record_up_down_counter(
        &self,
        tag: &str,
        name: &str,
        value: f64,
        opts: RecordOptions<'_>,
    ) -> MetricsResult<()> {
        check_finite(name, value)?;
        let attributes = AttributeSet::parse(opts.attributes)?;
        self.instrument(tag, name, InstrumentKind::UpDownCounter, opts)
            .record(Measurement::Float(value), attributes);
        Ok(())
    }

    /// Record one sample into a histogram. NaN and infinities are rejected.
    pub fn record_histogram(
        &self,
        tag: &str,
        name: &str,
        value: f64,
        opts: RecordOptions<'_>,
    ) -> MetricsResult<()> {
        check_finite(name, value)?;
        let attributes = AttributeSet::parse(opts.attributes)?;
        self.instrument(tag, name, InstrumentKind::Histogram, opts)
            .record(Measurement::Float(value), attributes);
        Ok(())
    }

    /// Run `f` and record its wall-clock duration in milliseconds.
    ///
    /// Labels are validated before `f` runs.
    pub fn time_histogram<T>(
        &self,
        tag: &str,
        name: &str,
        opts: RecordOptions<'_>,
        f: impl FnOnce() -> T,
    ) -> MetricsResult<T> {
        let attributes = AttributeSet::parse(opts.attributes)?;
        let started = Instant::now();
        let out = f();
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.instrument(tag, name, InstrumentKind::Histogram, opts)
            .record(Measurement::Float(elapsed_ms), attributes);
        Ok(out)
    }

    /// Register a gauge read through `callback` at snapshot time.
    ///
    /// Registering the same (tag, name) again replaces the callback.
    pub fn register_gauge<F>(&self, tag: &str, name: &str, opts: RecordOptions<'_>, callback: F)
    where
        F: Fn(&mut GaugeObserver) + Send + Sync + 'static,
    {
        let callback: GaugeCallback = Arc::new(callback);
        self.instrument(tag, name, InstrumentKind::Gauge, opts)
            .set_callback(callback);
        debug!(%tag, %name, "gauge registered");
    }

    /// Number of distinct instruments created so far.
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Look up an instrument without creating it.
    pub fn get(&self, tag: &str, name: &str, kind: InstrumentKind) -> Option<Arc<Instrument>> {
        let id = InstrumentId {
            scope: tag.to_string(),
            name: name.to_string(),
            kind,
        };
        self.instruments.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Read every instrument into an immutable snapshot.
    pub fn snapshot(&self) -> MetricSnapshot {
        let instruments: Vec<Arc<Instrument>> = self
            .instruments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        // Gauge callbacks run with no map shard held.
        let mut metrics: Vec<_> = instruments.iter().filter_map(|i| i.read()).collect();
        metrics.sort_by(|a, b| (&a.scope, &a.name).cmp(&(&b.scope, &b.name)));

        MetricSnapshot {
            start_time_unix_nano: self.start_time_unix_nano,
            time_unix_nano: epoch_nanos(),
            metrics,
        }
    }

    fn instrument(
        &self,
        tag: &str,
        name: &str,
        kind: InstrumentKind,
        opts: RecordOptions<'_>,
    ) -> Arc<Instrument> {
        let id = InstrumentId {
            scope: tag.to_string(),
            name: name.to_string(),
            kind,
        };
        if let Some(existing) = self.instruments.get(&id) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .instruments
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(%tag, %name, ?kind, "instrument created");
                Arc::new(Instrument::new(id, opts.meta()))
            });
        Arc::clone(entry.value())
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for MetricRegistry {
    fn collect(&self) -> MetricSnapshot {
        self.snapshot()
    }
}

fn check_finite(name: &str, value: f64) -> MetricsResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MetricsError::InvalidValue {
            name: name.to_string(),
            value,
        })
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
