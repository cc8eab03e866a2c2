//! Conversion between wire series and storage rows
//!
//! `normalize` runs on the write path and `denormalize` on the read path.
//! Both are pure and allocation-bounded by their input.

use crate::schema::{millis_to_datetime, LabelSet, SamplePoint, StorageRow, WireSeries};

use std::collections::HashMap;
use tracing::warn;

/// Flatten wire series into storage rows.
///
/// Every finite sample yields one row carrying the series' full label set;
/// NaN and infinite values are dropped. Rows come out in (series, sample)
/// order.
pub fn normalize(series: &[WireSeries]) -> Vec<StorageRow> {
    let capacity: usize = series.iter().map(|s| s.samples.len()).sum();
    let mut rows = Vec::with_capacity(capacity);

    for ts in series {
        let name = ts.labels.metric_name().to_string();

        for sample in &ts.samples {
            if !sample.value.is_finite() {
                continue;
            }

            let Some(timestamp) = millis_to_datetime(sample.timestamp_ms) else {
                warn!(
                    metric = %name,
                    timestamp_ms = sample.timestamp_ms,
                    "Dropping sample with unrepresentable timestamp"
                );
                continue;
            };

            rows.push(StorageRow {
                name: name.clone(),
                labels: ts.labels.clone(),
                value: sample.value,
                timestamp,
            });
        }
    }

    rows
}

/// Regroup storage rows into wire series.
///
/// Rows are grouped by label-set equality (order of labels does not matter).
/// Series appear in order of their first row; samples keep the order the
/// store returned them in.
pub fn denormalize(rows: Vec<StorageRow>) -> Vec<WireSeries> {
    let mut series: Vec<WireSeries> = Vec::new();
    let mut index: HashMap<Vec<(String, String)>, usize> = HashMap::new();

    for row in rows {
        let key = group_key(&row.labels);
        let sample = SamplePoint::new(row.timestamp_ms(), row.value);

        match index.get(&key) {
            Some(&position) => series[position].samples.push(sample),
            None => {
                index.insert(key, series.len());
                series.push(WireSeries::new(row.labels, vec![sample]));
            }
        }
    }

    series
}

fn group_key(labels: &LabelSet) -> Vec<(String, String)> {
    labels
        .canonical()
        .into_iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::datetime_to_millis;

    fn series(pairs: &[(&str, &str)], samples: &[(i64, f64)]) -> WireSeries {
        WireSeries::new(
            LabelSet::from_pairs(pairs.iter().copied()),
            samples
                .iter()
                .map(|&(t, v)| SamplePoint::new(t, v))
                .collect(),
        )
    }

    fn row(pairs: &[(&str, &str)], t: i64, v: f64) -> StorageRow {
        let labels = LabelSet::from_pairs(pairs.iter().copied());
        StorageRow {
            name: labels.metric_name().to_string(),
            labels,
            value: v,
            timestamp: millis_to_datetime(t).unwrap(),
        }
    }

    #[test]
    fn test_normalize_drops_non_finite() {
        let input = vec![series(
            &[("__name__", "cpu_usage"), ("host", "a")],
            &[
                (1000, 0.5),
                (2000, f64::NAN),
                (3000, 0.75),
                (4000, f64::INFINITY),
                (5000, f64::NEG_INFINITY),
            ],
        )];

        let rows = normalize(&input);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp_ms(), 1000);
        assert_eq!(rows[1].timestamp_ms(), 3000);
        assert!(rows.iter().all(|r| r.value.is_finite()));
    }

    #[test]
    fn test_normalize_row_count_matches_finite_samples() {
        let values = [1.0, f64::NAN, -2.5, 0.0, f64::INFINITY, 1e300, f64::NAN];
        let samples: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as i64 * 10, v))
            .collect();
        let input = vec![
            series(&[("__name__", "a")], &samples),
            series(&[("__name__", "b")], &samples),
        ];

        let finite = values.iter().filter(|v| v.is_finite()).count() * 2;
        assert_eq!(normalize(&input).len(), finite);
    }

    #[test]
    fn test_normalize_propagates_full_label_set() {
        let pairs = [("__name__", "http_requests"), ("code", "200"), ("job", "api")];
        let input = vec![series(&pairs, &[(1, 1.0), (2, 2.0), (3, 3.0)])];

        let rows = normalize(&input);

        for row in &rows {
            assert_eq!(row.name, "http_requests");
            assert_eq!(row.labels, LabelSet::from_pairs(pairs));
        }
    }

    #[test]
    fn test_normalize_without_metric_name() {
        let rows = normalize(&[series(&[("job", "api")], &[(1, 1.0)])]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "");
    }

    #[test]
    fn test_normalize_keeps_series_then_sample_order() {
        let input = vec![
            series(&[("__name__", "b")], &[(20, 1.0), (10, 2.0)]),
            series(&[("__name__", "a")], &[(5, 3.0)]),
        ];

        let order: Vec<(String, i64)> = normalize(&input)
            .into_iter()
            .map(|r| (r.name.clone(), datetime_to_millis(&r.timestamp)))
            .collect();

        assert_eq!(
            order,
            vec![("b".into(), 20), ("b".into(), 10), ("a".into(), 5)]
        );
    }

    #[test]
    fn test_denormalize_groups_interleaved_rows() {
        let a = [("__name__", "cpu"), ("host", "a")];
        let b = [("__name__", "cpu"), ("host", "b")];
        let rows = vec![
            row(&a, 1, 1.0),
            row(&b, 1, 10.0),
            row(&b, 2, 20.0),
            row(&a, 2, 2.0),
            row(&a, 3, 3.0),
        ];

        let result = denormalize(rows);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].labels, LabelSet::from_pairs(a));
        assert_eq!(
            result[0].samples,
            vec![
                SamplePoint::new(1, 1.0),
                SamplePoint::new(2, 2.0),
                SamplePoint::new(3, 3.0)
            ]
        );
        assert_eq!(result[1].labels, LabelSet::from_pairs(b));
        assert_eq!(
            result[1].samples,
            vec![SamplePoint::new(1, 10.0), SamplePoint::new(2, 20.0)]
        );
    }

    #[test]
    fn test_denormalize_groups_by_full_label_set_not_name() {
        let rows = vec![
            row(&[("__name__", "up"), ("job", "x")], 1, 1.0),
            row(&[("__name__", "up"), ("job", "y")], 1, 0.0),
        ];
        assert_eq!(denormalize(rows).len(), 2);
    }

    #[test]
    fn test_denormalize_label_order_insensitive() {
        let rows = vec![
            row(&[("__name__", "up"), ("job", "x")], 1, 1.0),
            row(&[("job", "x"), ("__name__", "up")], 2, 1.0),
        ];

        let result = denormalize(rows);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].samples.len(), 2);
    }

    #[test]
    fn test_denormalize_empty() {
        assert!(denormalize(Vec::new()).is_empty());
    }

    #[test]
    fn test_normalize_then_denormalize_restores_finite_series() {
        let input = vec![
            series(&[("__name__", "a"), ("x", "1")], &[(1, 1.0), (2, f64::NAN), (3, 3.0)]),
            series(&[("__name__", "b")], &[(7, 7.0)]),
        ];

        let output = denormalize(normalize(&input));

        assert_eq!(
            output,
            vec![
                series(&[("__name__", "a"), ("x", "1")], &[(1, 1.0), (3, 3.0)]),
                series(&[("__name__", "b")], &[(7, 7.0)]),
            ]
        );
    }
}
