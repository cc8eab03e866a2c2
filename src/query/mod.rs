//! Remote read queries
//!
//! A read request carries one or more queries. Each one is translated into
//! a [`StoreQuery`], executed through the store gateway and reconstructed
//! into wire series. The response holds one result per query, in request
//! order. Any failure fails the whole request.

mod predicate;
mod telemetry;

pub use predicate::{
    Column, LabelMatcher, MatchOp, PredicateTerm, ReadPredicate, StoreQuery, TimeRange,
};

use crate::context::RequestContext;
use crate::schema::{TableRef, WireSeries};
use crate::store::StoreGateway;
use crate::{transform, wire, Error, Result};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Handles remote read requests
pub struct QueryNode {
    store: Arc<dyn StoreGateway>,
    table: TableRef,
}

#[derive(Debug, Default)]
struct ReadStats {
    queries: usize,
    rows: usize,
    series: usize,
}

impl QueryNode {
    pub fn new(store: Arc<dyn StoreGateway>, table: TableRef) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Answer one snappy-compressed remote read request
    pub async fn handle_read(&self, body: &[u8], ctx: &RequestContext) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let mut stats = ReadStats::default();

        let result = self.read(body, ctx, &mut stats).await;
        let (outcome, error_kind, bytes_returned) = match &result {
            Ok(bytes) => ("success", None, bytes.len() as u64),
            Err(e) => ("error", Some(e.kind()), 0),
        };
        telemetry::record_read(telemetry::ReadMetrics {
            outcome,
            error_kind,
            duration_seconds: start_time.elapsed().as_secs_f64(),
            queries: stats.queries as u64,
            rows_returned: stats.rows as u64,
            series_returned: stats.series as u64,
            bytes_returned,
        });
        result
    }

    async fn read(&self, body: &[u8], ctx: &RequestContext, stats: &mut ReadStats) -> Result<Vec<u8>> {
        let raw = wire::decode_envelope(body).inspect_err(|e| {
            warn!(error = %e, size_bytes = body.len(), "Rejected read request");
        })?;
        let predicates = wire::parse_read_request(&raw).inspect_err(|e| {
            warn!(error = %e, size_bytes = raw.len(), "Rejected read request");
        })?;
        stats.queries = predicates.len();

        // Every matcher is validated before the store sees any query
        let queries = predicates
            .iter()
            .map(StoreQuery::translate)
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| {
                warn!(error = %e, "Rejected read matcher");
            })?;

        let mut results: Vec<Vec<WireSeries>> = Vec::with_capacity(queries.len());
        for (predicate, query) in predicates.iter().zip(&queries) {
            let series = self.execute(predicate, query, ctx, stats).await?;
            results.push(series);
        }

        let response = wire::encode_read_response(&results);
        wire::encode_envelope(&response)
    }

    async fn execute(
        &self,
        predicate: &ReadPredicate,
        query: &StoreQuery,
        ctx: &RequestContext,
        stats: &mut ReadStats,
    ) -> Result<Vec<WireSeries>> {
        debug!(table = %self.table, sql = %query.to_sql(&self.table), "Executing store query");

        let rows = ctx
            .run(self.store.query_rows(&self.table, query))
            .await
            .map_err(|e| match e {
                Error::StoreQuery(_) | Error::DeadlineExceeded | Error::Cancelled => e,
                other => Error::StoreQuery(other.to_string()),
            })
            .inspect_err(|e| {
                error!(table = %self.table, error = %e, "Store query failed");
            })?;

        stats.rows += rows.len();
        let series = transform::denormalize(rows);
        stats.series += series.len();

        debug!(
            matchers = predicate.matchers.len(),
            start_ms = predicate.start_ms,
            end_ms = predicate.end_ms,
            series = series.len(),
            "Query answered"
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{millis_to_datetime, LabelSet, SamplePoint, StorageRow, TableDescriptor};
    use crate::store::MemoryStore;

    fn table() -> TableRef {
        TableRef::new("p", "d", "t")
    }

    async fn node_with_rows(rows: Vec<StorageRow>) -> (QueryNode, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.seed_dataset("d");
        store
            .create_table(&TableDescriptor::for_storage_rows(table()))
            .await
            .unwrap();
        store.insert_rows(&table(), rows).await.unwrap();
        (QueryNode::new(store.clone(), table()), store)
    }

    fn row(name: &str, host: &str, t: i64, v: f64) -> StorageRow {
        StorageRow {
            name: name.to_string(),
            labels: LabelSet::from_pairs([("__name__", name), ("host", host)]),
            value: v,
            timestamp: millis_to_datetime(t).unwrap(),
        }
    }

    fn request(predicates: &[ReadPredicate]) -> Vec<u8> {
        wire::encode_envelope(&wire::encode_read_request(predicates)).unwrap()
    }

    fn response(body: &[u8]) -> Vec<Vec<WireSeries>> {
        wire::parse_read_response(&wire::decode_envelope(body).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_one_result_per_query_in_order() {
        let (node, _) = node_with_rows(vec![
            row("cpu", "a", 1_000, 1.0),
            row("mem", "a", 1_000, 2.0),
        ])
        .await;

        let body = request(&[
            ReadPredicate::new(vec![LabelMatcher::equal("__name__", "mem")], 0, 5_000),
            ReadPredicate::new(vec![LabelMatcher::equal("__name__", "cpu")], 0, 5_000),
            ReadPredicate::new(vec![LabelMatcher::equal("__name__", "disk")], 0, 5_000),
        ]);
        let results = response(&node.handle_read(&body, &RequestContext::background()).await.unwrap());

        assert_eq!(results.len(), 3);
        assert_eq!(results[0][0].labels.metric_name(), "mem");
        assert_eq!(results[1][0].labels.metric_name(), "cpu");
        assert!(results[2].is_empty());
    }

    #[tokio::test]
    async fn test_time_bounds_are_inclusive() {
        let (node, _) = node_with_rows(vec![
            row("cpu", "a", 999, 0.0),
            row("cpu", "a", 1_000, 1.0),
            row("cpu", "a", 2_000, 2.0),
            row("cpu", "a", 2_001, 3.0),
        ])
        .await;

        let body = request(&[ReadPredicate::new(
            vec![LabelMatcher::equal("__name__", "cpu")],
            1_000,
            2_000,
        )]);
        let results = response(&node.handle_read(&body, &RequestContext::background()).await.unwrap());

        assert_eq!(
            results[0][0].samples,
            vec![SamplePoint::new(1_000, 1.0), SamplePoint::new(2_000, 2.0)]
        );
    }

    #[tokio::test]
    async fn test_invalid_regex_is_client_error_without_store_call() {
        let (node, store) = node_with_rows(vec![]).await;
        let before = store.call_counts().queries;

        let body = request(&[ReadPredicate::new(
            vec![LabelMatcher::new("host", MatchOp::RegexMatch, "(")],
            0,
            1,
        )]);
        let err = node
            .handle_read(&body, &RequestContext::background())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidMatcher(_)));
        assert!(err.is_client_error());
        assert_eq!(store.call_counts().queries, before);
    }

    #[tokio::test]
    async fn test_invalid_regex_in_later_query_rejects_before_any_store_call() {
        let (node, store) = node_with_rows(vec![row("cpu", "a", 1, 1.0)]).await;
        let before = store.call_counts().queries;

        let body = request(&[
            ReadPredicate::new(vec![LabelMatcher::equal("__name__", "cpu")], 0, 10),
            ReadPredicate::new(vec![LabelMatcher::new("host", MatchOp::RegexNoMatch, "[a-")], 0, 10),
        ]);
        let err = node
            .handle_read(&body, &RequestContext::background())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidMatcher(_)));
        assert_eq!(store.call_counts().queries, before);
    }

    #[tokio::test]
    async fn test_store_failure_fails_whole_request() {
        let (node, store) = node_with_rows(vec![row("cpu", "a", 1, 1.0)]).await;
        store.fail_next_queries(1);

        let body = request(&[ReadPredicate::new(vec![], 0, 10)]);
        let err = node
            .handle_read(&body, &RequestContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreQuery(_)));
    }
}
