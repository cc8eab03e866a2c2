//! Remote write path: decode, readiness, normalize, insert

mod common;

use common::{api_state, test_table, write_body, RecordingStore};
use prombridge::context::RequestContext;
use prombridge::schema::{millis_to_datetime, LabelSet, SamplePoint, StorageRow, WireSeries};
use prombridge::store::MemoryStore;
use std::sync::Arc;

fn cpu_usage_series() -> WireSeries {
    WireSeries::new(
        LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]),
        vec![
            SamplePoint::new(1_000, 0.5),
            SamplePoint::new(2_000, f64::NAN),
            SamplePoint::new(3_000, 0.75),
        ],
    )
}

#[tokio::test]
async fn test_write_drops_nan_and_inserts_once() {
    let store = Arc::new(RecordingStore::new());
    let state = api_state(store.clone());

    let summary = state
        .ingester
        .handle_write(&write_body(&[cpu_usage_series()]), &RequestContext::background())
        .await
        .unwrap();

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.dropped(), 1);

    let labels = LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]);
    let expected = vec![
        StorageRow {
            name: "cpu_usage".to_string(),
            labels: labels.clone(),
            value: 0.5,
            timestamp: millis_to_datetime(1_000).unwrap(),
        },
        StorageRow {
            name: "cpu_usage".to_string(),
            labels,
            value: 0.75,
            timestamp: millis_to_datetime(3_000).unwrap(),
        },
    ];

    assert_eq!(store.inserts(), vec![expected.clone()]);
    assert_eq!(store.inner.rows(&test_table()), expected);
}

#[tokio::test]
async fn test_every_row_carries_full_label_set() {
    let store = Arc::new(MemoryStore::new());
    let state = api_state(store.clone());

    let labels = LabelSet::from_pairs([
        ("__name__", "http_requests_total"),
        ("method", "GET"),
        ("code", "200"),
    ]);
    let series = WireSeries::new(
        labels.clone(),
        (0..10).map(|i| SamplePoint::new(i * 1_000, i as f64)).collect(),
    );

    state
        .ingester
        .handle_write(&write_body(&[series]), &RequestContext::background())
        .await
        .unwrap();

    let rows = store.rows(&test_table());
    assert_eq!(rows.len(), 10);
    for row in &rows {
        assert_eq!(row.labels, labels);
        assert_eq!(row.name, "http_requests_total");
    }
}

#[tokio::test]
async fn test_series_without_name_label_is_stored_with_empty_name() {
    let store = Arc::new(MemoryStore::new());
    let state = api_state(store.clone());

    let series = WireSeries::new(
        LabelSet::from_pairs([("job", "node")]),
        vec![SamplePoint::new(1_000, 1.0)],
    );
    state
        .ingester
        .handle_write(&write_body(&[series]), &RequestContext::background())
        .await
        .unwrap();

    let rows = store.rows(&test_table());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "");
}

#[tokio::test]
async fn test_table_created_on_first_write_only() {
    let store = Arc::new(MemoryStore::new());
    let state = api_state(store.clone());
    let ctx = RequestContext::background();

    for _ in 0..3 {
        state
            .ingester
            .handle_write(&write_body(&[cpu_usage_series()]), &ctx)
            .await
            .unwrap();
    }

    // One dataset create plus one table create
    assert_eq!(store.call_counts().creates, 2);
    assert_eq!(store.call_counts().inserts, 3);
    assert_eq!(store.rows(&test_table()).len(), 6);
}

#[tokio::test]
async fn test_all_invalid_samples_still_insert_empty_batch() {
    let store = Arc::new(RecordingStore::new());
    let state = api_state(store.clone());

    let series = WireSeries::new(
        LabelSet::from_pairs([("__name__", "broken")]),
        vec![
            SamplePoint::new(1_000, f64::NAN),
            SamplePoint::new(2_000, f64::NEG_INFINITY),
        ],
    );
    let summary = state
        .ingester
        .handle_write(&write_body(&[series]), &RequestContext::background())
        .await
        .unwrap();

    assert_eq!(summary.rows, 0);
    assert_eq!(store.inserts(), vec![Vec::<StorageRow>::new()]);
}
