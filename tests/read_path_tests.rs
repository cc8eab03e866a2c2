//! Remote read path against the in-memory and Parquet-backed stores

mod common;

use common::{api_state, decode_read_response, read_body, test_config, write_body};
use prombridge::config::ComponentFactory;
use prombridge::context::RequestContext;
use prombridge::query::{LabelMatcher, MatchOp, ReadPredicate};
use prombridge::schema::{LabelSet, SamplePoint, WireSeries};
use prombridge::store::{MemoryStore, StoreGateway};
use prombridge::{StorageBackend, StoreConfig};
use std::sync::Arc;

fn fixture() -> Vec<WireSeries> {
    vec![
        WireSeries::new(
            LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]),
            vec![
                SamplePoint::new(1_000, 0.5),
                SamplePoint::new(3_000, 0.75),
                SamplePoint::new(90_000, 0.9),
            ],
        ),
        WireSeries::new(
            LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "b")]),
            vec![SamplePoint::new(2_000, 0.25)],
        ),
        WireSeries::new(
            LabelSet::from_pairs([("__name__", "mem_usage"), ("host", "a")]),
            vec![SamplePoint::new(1_000, 42.0)],
        ),
    ]
}

async fn seeded(store: Arc<dyn StoreGateway>) -> prombridge::api::ApiState {
    let state = api_state(store);
    state
        .ingester
        .handle_write(&write_body(&fixture()), &RequestContext::background())
        .await
        .unwrap();
    state
}

async fn read(state: &prombridge::api::ApiState, predicates: &[ReadPredicate]) -> Vec<Vec<WireSeries>> {
    let body = state
        .query_node
        .handle_read(&read_body(predicates), &RequestContext::background())
        .await
        .unwrap();
    decode_read_response(&body)
}

fn sorted(mut series: Vec<WireSeries>) -> Vec<WireSeries> {
    series.sort_by(|a, b| a.labels.canonical().cmp(&b.labels.canonical()));
    series
}

async fn assert_read_semantics(store: Arc<dyn StoreGateway>) {
    let state = seeded(store).await;

    // Name matcher within range
    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![LabelMatcher::equal("__name__", "cpu_usage"), LabelMatcher::equal("host", "a")],
            0,
            10_000,
        )],
    )
    .await;
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0],
        vec![WireSeries::new(
            LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]),
            vec![SamplePoint::new(1_000, 0.5), SamplePoint::new(3_000, 0.75)],
        )]
    );

    // Regex and negative matchers
    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![
                LabelMatcher::new("__name__", MatchOp::RegexMatch, ".*_usage"),
                LabelMatcher::new("host", MatchOp::NotEqual, "a"),
            ],
            0,
            10_000,
        )],
    )
    .await;
    assert_eq!(results[0].len(), 1);
    assert_eq!(results[0][0].labels.get("host"), Some("b"));

    // Regexes are anchored: "cpu" alone matches nothing
    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![LabelMatcher::new("__name__", MatchOp::RegexMatch, "cpu")],
            0,
            100_000,
        )],
    )
    .await;
    assert!(results[0].is_empty());

    // Missing label compares as the empty string
    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![
                LabelMatcher::equal("__name__", "cpu_usage"),
                LabelMatcher::equal("region", ""),
            ],
            0,
            100_000,
        )],
    )
    .await;
    assert_eq!(sorted(results[0].clone()).len(), 2);
}

#[tokio::test]
async fn test_end_to_end_read_cpu_usage() {
    let store = Arc::new(MemoryStore::new());
    let state = seeded(store).await;

    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![LabelMatcher::equal("__name__", "cpu_usage")],
            0,
            10_000,
        )],
    )
    .await;

    let series = sorted(results.into_iter().next().unwrap());
    assert_eq!(
        series,
        vec![
            WireSeries::new(
                LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]),
                vec![SamplePoint::new(1_000, 0.5), SamplePoint::new(3_000, 0.75)],
            ),
            WireSeries::new(
                LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "b")]),
                vec![SamplePoint::new(2_000, 0.25)],
            ),
        ]
    );
}

#[tokio::test]
async fn test_read_semantics_memory_store() {
    assert_read_semantics(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_read_semantics_local_parquet_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        backend: StorageBackend::Local,
        path: Some(dir.path().to_string_lossy().into_owned()),
        ..Default::default()
    };
    let store =
        ComponentFactory::create_store_gateway(&test_config().table.project, &config).unwrap();

    assert_read_semantics(store).await;
}

#[tokio::test]
async fn test_parquet_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        backend: StorageBackend::Local,
        path: Some(dir.path().to_string_lossy().into_owned()),
        ..Default::default()
    };
    let project = test_config().table.project;

    {
        let store = ComponentFactory::create_store_gateway(&project, &config).unwrap();
        seeded(store).await;
    }

    let store = ComponentFactory::create_store_gateway(&project, &config).unwrap();
    let state = api_state(store.clone());
    state.tables.ensure_ready().await.unwrap();

    let results = read(
        &state,
        &[ReadPredicate::new(
            vec![LabelMatcher::equal("__name__", "mem_usage")],
            0,
            10_000,
        )],
    )
    .await;
    assert_eq!(results[0].len(), 1);
    assert_eq!(results[0][0].samples, vec![SamplePoint::new(1_000, 42.0)]);
}
