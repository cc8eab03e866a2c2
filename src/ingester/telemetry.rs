//! Write path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct IngesterInstruments {
    write_requests: Counter<u64>,
    write_bytes: Counter<u64>,
    write_duration_seconds: Histogram<f64>,
    write_series: Histogram<u64>,
    rows_inserted: Counter<u64>,
    samples_dropped: Counter<u64>,
    write_failures: Counter<u64>,
}

fn instruments() -> &'static IngesterInstruments {
    static INSTRUMENTS: OnceLock<IngesterInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("prombridge.ingester");
        IngesterInstruments {
            write_requests: meter
                .u64_counter("prombridge.ingester.write.requests")
                .with_description("Remote write requests persisted")
                .init(),
            write_bytes: meter
                .u64_counter("prombridge.ingester.write.bytes")
                .with_description("Compressed remote write bytes accepted")
                .with_unit("By")
                .init(),
            write_duration_seconds: meter
                .f64_histogram("prombridge.ingester.write.duration")
                .with_description("Remote write handling duration")
                .with_unit("s")
                .init(),
            write_series: meter
                .u64_histogram("prombridge.ingester.write.series")
                .with_description("Series per remote write request")
                .init(),
            rows_inserted: meter
                .u64_counter("prombridge.ingester.rows.inserted")
                .with_description("Storage rows inserted")
                .init(),
            samples_dropped: meter
                .u64_counter("prombridge.ingester.samples.dropped")
                .with_description("Samples dropped as non-finite or unrepresentable")
                .init(),
            write_failures: meter
                .u64_counter("prombridge.ingester.write.failures")
                .with_description("Remote write failures by error kind")
                .init(),
        }
    })
}

pub fn record_write(duration_seconds: f64, body_bytes: u64, series: u64, rows: u64, dropped: u64) {
    let i = instruments();
    i.write_requests.add(1, &[]);
    i.write_bytes.add(body_bytes, &[]);
    i.write_duration_seconds.record(duration_seconds, &[]);
    i.write_series.record(series, &[]);
    i.rows_inserted.add(rows, &[]);
    if dropped > 0 {
        i.samples_dropped.add(dropped, &[]);
    }
}

pub fn record_write_failure(kind: &'static str) {
    instruments()
        .write_failures
        .add(1, &[KeyValue::new("kind", kind)]);
}
