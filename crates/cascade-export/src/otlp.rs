//! Snapshot → OTLP `ExportMetricsServiceRequest` encoding.
//!
//! One `ResourceMetrics` per batch carrying the process identity, one
//! `ScopeMetrics` per tag, one `Metric` per instrument. All sums and
//! histograms are cumulative.

use std::collections::BTreeMap;

use cascade_core::CollectorConfig;
use cascade_metrics::{
    AttributeSet, HistogramPoint, MetricData, MetricReading, MetricSnapshot, NumberPoint,
    NumberValue,
};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, AggregationTemporality, Gauge, Histogram, HistogramDataPoint,
    Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;

/// Resource-level labels attached to every exported batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub instance: String,
    pub namespace: String,
    pub service: String,
    pub hostname: String,
    pub app_name: String,
}

impl ResourceIdentity {
    pub fn from_config(config: &CollectorConfig, hostname: &str) -> Self {
        Self {
            instance: config.instance.clone(),
            namespace: config.namespace.clone(),
            service: config.service.clone(),
            hostname: hostname.to_string(),
            app_name: config.app_name.clone(),
        }
    }

    fn to_resource(&self) -> Resource {
        Resource {
            attributes: vec![
                string_kv("instance", &self.instance),
                string_kv("namespace", &self.namespace),
                string_kv("service", &self.service),
                string_kv("hostname", &self.hostname),
                string_kv("appName", &self.app_name),
            ],
            ..Default::default()
        }
    }
}

/// Encode a snapshot as a single-resource export request.
pub fn encode(snapshot: &MetricSnapshot, resource: &ResourceIdentity) -> ExportMetricsServiceRequest {
    let mut scopes: BTreeMap<&str, Vec<Metric>> = BTreeMap::new();
    for reading in &snapshot.metrics {
        scopes
            .entry(reading.scope.as_str())
            .or_default()
            .push(encode_metric(reading, snapshot));
    }

    let scope_metrics = scopes
        .into_iter()
        .map(|(scope, metrics)| ScopeMetrics {
            scope: Some(InstrumentationScope {
                name: scope.to_string(),
                ..Default::default()
            }),
            metrics,
            ..Default::default()
        })
        .collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource.to_resource()),
            scope_metrics,
            ..Default::default()
        }],
    }
}

fn encode_metric(reading: &MetricReading, snapshot: &MetricSnapshot) -> Metric {
    let start = snapshot.start_time_unix_nano;
    let now = snapshot.time_unix_nano;
    let cumulative = AggregationTemporality::Cumulative as i32;

    let data = match &reading.data {
        MetricData::Sum { monotonic, points } => metric::Data::Sum(Sum {
            data_points: points.iter().map(|p| number_point(p, start, now)).collect(),
            aggregation_temporality: cumulative,
            is_monotonic: *monotonic,
        }),
        MetricData::Gauge { points } => metric::Data::Gauge(Gauge {
            data_points: points.iter().map(|p| number_point(p, 0, now)).collect(),
        }),
        MetricData::Histogram { bounds, points } => metric::Data::Histogram(Histogram {
            data_points: points
                .iter()
                .map(|p| histogram_point(p, bounds, start, now))
                .collect(),
            aggregation_temporality: cumulative,
        }),
    };

    Metric {
        name: reading.name.clone(),
        description: reading.description.clone().unwrap_or_default(),
        unit: reading.unit.clone().unwrap_or_default(),
        data: Some(data),
        ..Default::default()
    }
}

fn number_point(point: &NumberPoint, start: u64, now: u64) -> NumberDataPoint {
    let value = match point.value {
        NumberValue::Int(v) => number_data_point::Value::AsInt(i64::try_from(v).unwrap_or(i64::MAX)),
        NumberValue::Float(v) => number_data_point::Value::AsDouble(v),
    };
    NumberDataPoint {
        attributes: attributes(&point.attributes),
        start_time_unix_nano: start,
        time_unix_nano: now,
        value: Some(value),
        ..Default::default()
    }
}

fn histogram_point(point: &HistogramPoint, bounds: &[f64], start: u64, now: u64) -> HistogramDataPoint {
    HistogramDataPoint {
        attributes: attributes(&point.attributes),
        start_time_unix_nano: start,
        time_unix_nano: now,
        count: point.count,
        sum: Some(point.sum),
        bucket_counts: point.bucket_counts.clone(),
        explicit_bounds: bounds.to_vec(),
        min: Some(point.min),
        max: Some(point.max),
        ..Default::default()
    }
}

fn attributes(set: &AttributeSet) -> Vec<KeyValue> {
    set.iter().map(|(k, v)| string_kv(k, v)).collect()
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}
