//! Metrics collection and export
//!
//! This module provides Prometheus-style metrics collection.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricType {
    /// Nodes whose last heartbeat succeeded
    NodesOnline,
    /// Nodes whose last heartbeat failed
    NodesOffline,
    /// Fingerprint mismatches seen on heartbeat
    DriftDetections,
    /// Remediation pushes that completed
    Remediations,
    /// Remediation pushes that failed
    RemediationFailures,
    /// Peer keys rotated
    KeysRotated,
    /// Traffic samples persisted
    MetricSamples,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodesOnline => write!(f, "armor_nodes_online"),
            Self::NodesOffline => write!(f, "armor_nodes_offline"),
            Self::DriftDetections => write!(f, "armor_drift_detections_total"),
            Self::Remediations => write!(f, "armor_remediations_total"),
            Self::RemediationFailures => write!(f, "armor_remediation_failures_total"),
            Self::KeysRotated => write!(f, "armor_keys_rotated_total"),
            Self::MetricSamples => write!(f, "armor_metric_samples_total"),
        }
    }
}

impl MetricType {
    /// Get metric help text
    pub fn help_text(&self) -> &'static str {
        match self {
            Self::NodesOnline => "Number of nodes currently online",
            Self::NodesOffline => "Number of nodes currently offline",
            Self::DriftDetections => "Total configuration drift detections",
            Self::Remediations => "Total successful drift remediations",
            Self::RemediationFailures => "Total failed drift remediations",
            Self::KeysRotated => "Total peer keys rotated",
            Self::MetricSamples => "Total peer traffic samples persisted",
        }
    }

    /// Get metric type (counter, gauge)
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Self::NodesOnline | Self::NodesOffline => "gauge",
            Self::DriftDetections
            | Self::Remediations
            | Self::RemediationFailures
            | Self::KeysRotated
            | Self::MetricSamples => "counter",
        }
    }
}

/// Metric value with timestamp
#[derive(Debug, Clone)]
pub struct MetricValue {
    /// Value
    pub value: f64,
    /// Timestamp when last updated
    pub timestamp: Instant,
}

impl MetricValue {
    /// Create new metric value
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
        }
    }

    /// Age of the metric
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Metrics collector with thread-safe access
pub struct MetricsCollector {
    metrics: Arc<RwLock<BTreeMap<MetricType, MetricValue>>>,
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Set a gauge
    pub fn record(&self, metric_type: MetricType, value: f64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.insert(metric_type, MetricValue::new(value));
    }

    /// Add to a counter
    pub fn increment(&self, metric_type: MetricType, by: u64) {
        let mut metrics = self.metrics.write().unwrap();
        let entry = metrics
            .entry(metric_type)
            .or_insert_with(|| MetricValue::new(0.0));
        entry.value += by as f64;
        entry.timestamp = Instant::now();
    }

    /// Get a metric value
    pub fn get(&self, metric_type: MetricType) -> Option<MetricValue> {
        let metrics = self.metrics.read().unwrap();
        metrics.get(&metric_type).cloned()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().unwrap();
        let mut output = String::new();

        for (metric_type, value) in metrics.iter() {
            output.push_str(&format!(
                "# HELP {} {}\n",
                metric_type,
                metric_type.help_text()
            ));
            output.push_str(&format!(
                "# TYPE {} {}\n",
                metric_type,
                metric_type.metric_kind()
            ));
            output.push_str(&format!("{} {}\n", metric_type, value.value));
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_type_display() {
        assert_eq!(
            MetricType::DriftDetections.to_string(),
            "armor_drift_detections_total"
        );
    }

    #[test]
    fn test_metric_value() {
        let value = MetricValue::new(42.0);
        assert_eq!(value.value, 42.0);
        assert!(value.age().as_millis() < 100);
    }

    #[test]
    fn test_counter_increment() {
        let collector = MetricsCollector::new();
        collector.increment(MetricType::KeysRotated, 3);
        collector.increment(MetricType::KeysRotated, 2);

        let value = collector.get(MetricType::KeysRotated).unwrap();
        assert_eq!(value.value, 5.0);
    }

    #[test]
    fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        collector.record(MetricType::NodesOnline, 3.0);
        collector.increment(MetricType::Remediations, 1);

        let output = collector.export_prometheus();
        assert!(output.contains("# HELP armor_nodes_online"));
        assert!(output.contains("# TYPE armor_nodes_online gauge\narmor_nodes_online 3\n"));
        assert!(output.contains("# TYPE armor_remediations_total counter\narmor_remediations_total 1\n"));
    }

    #[test]
    fn test_export_order_is_stable() {
        let collector = MetricsCollector::new();
        collector.increment(MetricType::MetricSamples, 1);
        collector.record(MetricType::NodesOnline, 1.0);

        let output = collector.export_prometheus();
        let online = output.find("armor_nodes_online").unwrap();
        let samples = output.find("armor_metric_samples_total").unwrap();
        assert!(online < samples);
    }
}
