/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

/// Name of a metric the transport publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetricName {
    /// Number of distinct addresses currently cached for the bucket endpoint
    S3AddressCount,
    /// Bytes sent toward the service
    BytesUp,
    /// Bytes received from the service
    BytesDown,
}

impl MetricName {
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            MetricName::S3AddressCount => "S3AddressCount",
            MetricName::BytesUp => "BytesUp",
            MetricName::BytesDown => "BytesDown",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of measurement for a metric data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetricUnit {
    /// A dimensionless count
    Count,
    /// Bytes
    Bytes,
}

impl MetricUnit {
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Count => "Count",
            MetricUnit::Bytes => "Bytes",
        }
    }
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric data point.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    /// Metric name
    pub name: MetricName,
    /// Unit of `value`
    pub unit: MetricUnit,
    /// Measured value
    pub value: f64,
}

impl Metric {
    /// Create a new data point
    pub fn new(name: MetricName, unit: MetricUnit, value: f64) -> Metric {
        Metric { name, unit, value }
    }
}

/// Destination for metric data points recorded by the transport.
///
/// The transport only records; aggregation and publishing cadence belong to
/// the implementation behind this trait.
pub trait MetricsPublisher: Send + Sync + fmt::Debug {
    /// Record a single data point
    fn add_data_point(&self, metric: Metric);

    /// Record the terminal status of one part transfer
    fn add_transfer_status(&self, success: bool);
}

/// Publisher that emits every data point as a `tracing` event.
///
/// This is the default when no publisher is configured.
#[derive(Debug, Default)]
pub struct LogMetricsPublisher;

impl MetricsPublisher for LogMetricsPublisher {
    fn add_data_point(&self, metric: Metric) {
        tracing::debug!(
            name = metric.name.as_str(),
            unit = metric.unit.as_str(),
            value = metric.value,
            "metric data point"
        );
    }

    fn add_transfer_status(&self, success: bool) {
        tracing::debug!(success, "transfer status data point");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_units() {
        assert_eq!("S3AddressCount", MetricName::S3AddressCount.as_str());
        assert_eq!("BytesUp", format!("{}", MetricName::BytesUp));
        assert_eq!("Bytes", MetricUnit::Bytes.as_str());
        assert_eq!("Count", format!("{}", MetricUnit::Count));
    }
}
