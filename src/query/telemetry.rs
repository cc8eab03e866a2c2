//! Read path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct QueryInstruments {
    read_requests: Counter<u64>,
    read_duration_seconds: Histogram<f64>,
    read_queries: Histogram<u64>,
    rows_returned: Histogram<u64>,
    series_returned: Histogram<u64>,
    bytes_returned: Histogram<u64>,
}

fn instruments() -> &'static QueryInstruments {
    static INSTRUMENTS: OnceLock<QueryInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("prombridge.query");
        QueryInstruments {
            read_requests: meter
                .u64_counter("prombridge.query.read.requests")
                .with_description("Remote read requests by outcome")
                .init(),
            read_duration_seconds: meter
                .f64_histogram("prombridge.query.read.duration")
                .with_description("Remote read end-to-end latency")
                .with_unit("s")
                .init(),
            read_queries: meter
                .u64_histogram("prombridge.query.read.queries")
                .with_description("Queries per remote read request")
                .init(),
            rows_returned: meter
                .u64_histogram("prombridge.query.rows_returned")
                .with_description("Storage rows returned per request")
                .init(),
            series_returned: meter
                .u64_histogram("prombridge.query.series_returned")
                .with_description("Series reconstructed per request")
                .init(),
            bytes_returned: meter
                .u64_histogram("prombridge.query.bytes_returned")
                .with_description("Compressed response size")
                .with_unit("By")
                .init(),
        }
    })
}

pub struct ReadMetrics {
    pub outcome: &'static str,
    pub error_kind: Option<&'static str>,
    pub duration_seconds: f64,
    pub queries: u64,
    pub rows_returned: u64,
    pub series_returned: u64,
    pub bytes_returned: u64,
}

pub fn record_read(metrics: ReadMetrics) {
    let i = instruments();
    let mut attrs = vec![KeyValue::new("outcome", metrics.outcome)];
    if let Some(kind) = metrics.error_kind {
        attrs.push(KeyValue::new("error.kind", kind));
    }

    i.read_requests.add(1, &attrs);
    i.read_duration_seconds
        .record(metrics.duration_seconds, &attrs);
    i.read_queries.record(metrics.queries, &attrs);
    i.rows_returned.record(metrics.rows_returned, &attrs);
    i.series_returned.record(metrics.series_returned, &attrs);
    i.bytes_returned.record(metrics.bytes_returned, &attrs);
}
