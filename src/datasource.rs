// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hints::RuleMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Unknown,
}

impl From<&str> for MetricType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "counter" => MetricType::Counter,
            "gauge" => MetricType::Gauge,
            "histogram" => MetricType::Histogram,
            "summary" => MetricType::Summary,
            _ => MetricType::Unknown,
        }
    }
}

impl From<String> for MetricType {
    fn from(value: String) -> Self {
        MetricType::from(value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// Metric name to type classification, as returned by a metadata provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsMetadata(BTreeMap<String, MetricMetadata>);

impl MetricsMetadata {
    pub fn insert(&mut self, name: impl Into<String>, metric_type: MetricType) {
        self.0.insert(
            name.into(),
            MetricMetadata {
                metric_type,
                help: None,
            },
        );
    }

    pub fn metric_type(&self, name: &str) -> Option<MetricType> {
        self.0.get(name).map(|metadata| metadata.metric_type)
    }

    /// Entries of `other` replace entries of `self` with the same name.
    pub fn merge(&mut self, other: &MetricsMetadata) {
        self.0
            .extend(other.0.iter().map(|(name, meta)| (name.clone(), meta.clone())));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, MetricType)> for MetricsMetadata {
    fn from_iter<I: IntoIterator<Item = (S, MetricType)>>(iter: I) -> Self {
        let mut metadata = MetricsMetadata::default();
        for (name, metric_type) in iter {
            metadata.insert(name, metric_type);
        }
        metadata
    }
}

#[derive(Deserialize)]
struct MetadataEnvelope {
    data: BTreeMap<String, Vec<MetricMetadata>>,
}

/// Accepts either a flat `{name: {type, help}}` map or the Prometheus
/// `/api/v1/metadata` response, where each metric maps to a list of entries.
pub fn parse_metrics_metadata(text: &str) -> Result<MetricsMetadata, serde_json::Error> {
    if let Ok(envelope) = serde_json::from_str::<MetadataEnvelope>(text) {
        let entries = envelope
            .data
            .into_iter()
            .filter_map(|(name, mut entries)| {
                (!entries.is_empty()).then(|| (name, entries.swap_remove(0)))
            })
            .collect();
        return Ok(MetricsMetadata(entries));
    }
    serde_json::from_str(text)
}

/// One sample as sent by the caller. Both `[timestamp, value]` and the
/// legacy `[value, timestamp]` order occur, with numbers, numeric strings or
/// `null` in either position; only the presence of samples matters here.
pub type Datapoint = (serde_json::Value, serde_json::Value);

/// A result series: its labels and samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

impl Series {
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }
}

/// What the advisor knows about the datasource a query runs against.
#[derive(Debug, Clone, Copy, Default)]
pub struct Datasource<'a> {
    pub metadata: Option<&'a MetricsMetadata>,
    pub rules: Option<&'a RuleMapping>,
}

impl<'a> Datasource<'a> {
    pub fn with_metadata(mut self, metadata: &'a MetricsMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_rules(mut self, rules: &'a RuleMapping) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn metric_type(&self, name: &str) -> Option<MetricType> {
        self.metadata
            .and_then(|metadata| metadata.metric_type(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_type_is_case_insensitive() {
        let metadata: MetricsMetadata =
            serde_json::from_str(r#"{"foo": {"type": "COUNTER"}, "bar": {"type": "info"}}"#)
                .unwrap();
        assert_eq!(metadata.metric_type("foo"), Some(MetricType::Counter));
        assert_eq!(metadata.metric_type("bar"), Some(MetricType::Unknown));
        assert_eq!(metadata.metric_type("baz"), None);
    }

    #[test]
    fn parses_prometheus_metadata_response() {
        let text = r#"{
            "status": "success",
            "data": {
                "http_requests_total": [{"type": "counter", "help": "Requests.", "unit": ""}],
                "request_duration_seconds": [{"type": "histogram", "help": "", "unit": ""}],
                "empty": []
            }
        }"#;
        let metadata = parse_metrics_metadata(text).unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.metric_type("request_duration_seconds"),
            Some(MetricType::Histogram)
        );
    }

    #[test]
    fn parses_flat_metadata_map() {
        let metadata = parse_metrics_metadata(r#"{"up": {"type": "gauge"}}"#).unwrap();
        assert_eq!(metadata.metric_type("up"), Some(MetricType::Gauge));
        assert!(parse_metrics_metadata("[1, 2]").is_err());
    }

    #[test]
    fn merge_prefers_other_entries() {
        let mut base: MetricsMetadata =
            [("foo", MetricType::Gauge), ("bar", MetricType::Counter)]
                .into_iter()
                .collect();
        let overrides: MetricsMetadata = [("foo", MetricType::Counter)].into_iter().collect();
        base.merge(&overrides);
        assert_eq!(base.metric_type("foo"), Some(MetricType::Counter));
        assert_eq!(base.metric_type("bar"), Some(MetricType::Counter));
    }

    fn samples(datapoints: &str) -> Series {
        serde_json::from_str(&format!(r#"{{"datapoints": {datapoints}}}"#)).unwrap()
    }

    #[test]
    fn series_deserializes_timestamp_value_pairs() {
        let series = samples("[[1000, 23.0], [1001, 24.5]]");
        assert_eq!(
            series.datapoints,
            vec![
                (serde_json::json!(1000), serde_json::json!(23.0)),
                (serde_json::json!(1001), serde_json::json!(24.5)),
            ]
        );
        assert!(series.labels.is_empty());
        assert!(!series.is_empty());
    }

    #[test]
    fn series_accepts_legacy_value_timestamp_order() {
        let series = samples("[[0.5, 1000], [23, 1001]]");
        assert_eq!(series.datapoints.len(), 2);
        assert_eq!(series.datapoints[0].0, serde_json::json!(0.5));
    }

    #[test]
    fn series_accepts_fractional_second_timestamps() {
        let series = samples(r#"[[1435781451.781, 1], [1435781466.781, "1"]]"#);
        assert_eq!(series.datapoints.len(), 2);
        assert!(!series.is_empty());
    }

    #[test]
    fn series_accepts_null_values() {
        let series = samples("[[1000, null], [null, 1001]]");
        assert_eq!(series.datapoints[0].1, serde_json::Value::Null);
        assert!(!series.is_empty());
    }

    #[test]
    fn series_rejects_malformed_samples() {
        assert!(serde_json::from_str::<Series>(r#"{"datapoints": [[1000]]}"#).is_err());
        assert!(serde_json::from_str::<Series>(r#"{"datapoints": 5}"#).is_err());
    }
}
