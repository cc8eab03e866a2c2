//! Series, sample and storage row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved label holding the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label key-value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered label collection identifying one series
///
/// Order is preserved as received. Equality between label sets used for
/// grouping is order-insensitive, see [`LabelSet::same_set`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    pub fn new(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Build from `(name, value)` pairs
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(n, v)| Label::new(n, v)).collect())
    }

    /// Value of the label with the given name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Display name of the series; empty when `__name__` is absent
    pub fn metric_name(&self) -> &str {
        self.get(METRIC_NAME_LABEL).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Label> {
        self.0
    }

    /// Sorted view of the labels, identical for any ordering of the same set
    pub fn canonical(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .0
            .iter()
            .map(|l| (l.name.as_str(), l.value.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Set equality on the full label collection
    pub fn same_set(&self, other: &LabelSet) -> bool {
        self.len() == other.len() && self.canonical() == other.canonical()
    }
}

impl From<Vec<Label>> for LabelSet {
    fn from(labels: Vec<Label>) -> Self {
        Self(labels)
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Sample with timestamp and value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// One series as it appears on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct WireSeries {
    pub labels: LabelSet,
    pub samples: Vec<SamplePoint>,
}

impl WireSeries {
    pub fn new(labels: LabelSet, samples: Vec<SamplePoint>) -> Self {
        Self { labels, samples }
    }
}

/// Persisted unit: one sample of one series with its labels denormalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRow {
    pub name: String,
    pub labels: LabelSet,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl StorageRow {
    /// Timestamp as integer milliseconds since the epoch
    pub fn timestamp_ms(&self) -> i64 {
        datetime_to_millis(&self.timestamp)
    }
}

/// Convert epoch milliseconds to an absolute time.
///
/// Returns `None` outside the range representable by `DateTime<Utc>`.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    let secs = millis.div_euclid(1000);
    let rem_millis = millis.rem_euclid(1000);
    DateTime::from_timestamp(secs, (rem_millis * 1_000_000) as u32)
}

/// Convert an absolute time back to epoch milliseconds
pub fn datetime_to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp() * 1000 + i64::from(ts.timestamp_subsec_millis())
}
