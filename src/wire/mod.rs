//! Prometheus remote storage wire codec
//!
//! Both directions use a snappy block-compressed envelope around a protobuf
//! message. Decoding either succeeds completely or fails with
//! [`Error::Decompression`] / [`Error::MalformedMessage`]; there are no
//! partial results.

pub mod prompb;

use crate::query::{LabelMatcher, MatchOp, ReadPredicate};
use crate::schema::{millis_to_datetime, Label, LabelSet, SamplePoint, WireSeries};
use crate::{Error, Result};

use prost::Message;
use std::collections::HashSet;

pub const CONTENT_TYPE: &str = "application/x-protobuf";
pub const CONTENT_ENCODING: &str = "snappy";
pub const HEADER_REMOTE_READ_VERSION: &str = "X-Prometheus-Remote-Read-Version";
pub const HEADER_REMOTE_WRITE_VERSION: &str = "X-Prometheus-Remote-Write-Version";
pub const REMOTE_READ_VERSION: &str = "0.1.0";
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Remove the snappy envelope
pub fn decode_envelope(body: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(|e| Error::Decompression(e.to_string()))
}

/// Apply the snappy envelope (last step on the outbound path)
pub fn encode_envelope(raw: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(raw)
        .map_err(|e| Error::Internal(format!("snappy compression failed: {}", e)))
}

/// Parse a serialized remote write request
///
/// Sample timestamps must fall in the range storage timestamps can hold
/// (roughly years -262143 to 262142); anything else rejects the request.
pub fn parse_write_request(raw: &[u8]) -> Result<Vec<WireSeries>> {
    let request = prompb::WriteRequest::decode(raw)?;

    request
        .timeseries
        .into_iter()
        .map(|ts| {
            let labels = labels_from_wire(ts.labels)?;
            let samples = ts
                .samples
                .into_iter()
                .map(|s| {
                    if millis_to_datetime(s.timestamp).is_none() {
                        return Err(Error::MalformedMessage(format!(
                            "sample timestamp {} is out of range",
                            s.timestamp
                        )));
                    }
                    Ok(SamplePoint::new(s.timestamp, s.value))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(WireSeries::new(labels, samples))
        })
        .collect()
}

/// Parse a serialized remote read request into one predicate per query
pub fn parse_read_request(raw: &[u8]) -> Result<Vec<ReadPredicate>> {
    let request = prompb::ReadRequest::decode(raw)?;

    request
        .queries
        .into_iter()
        .map(|query| {
            let matchers = query
                .matchers
                .into_iter()
                .map(matcher_from_wire)
                .collect::<Result<Vec<_>>>()?;
            Ok(ReadPredicate::new(
                matchers,
                query.start_timestamp_ms,
                query.end_timestamp_ms,
            ))
        })
        .collect()
}

/// Serialize a read response; `results[i]` answers query `i`
pub fn encode_read_response(results: &[Vec<WireSeries>]) -> Vec<u8> {
    let response = prompb::ReadResponse {
        results: results
            .iter()
            .map(|series| prompb::QueryResult {
                timeseries: series.iter().map(series_to_wire).collect(),
            })
            .collect(),
    };
    response.encode_to_vec()
}

/// Serialize a write request (sender side)
pub fn encode_write_request(series: &[WireSeries]) -> Vec<u8> {
    prompb::WriteRequest {
        timeseries: series.iter().map(series_to_wire).collect(),
    }
    .encode_to_vec()
}

/// Serialize a read request (sender side)
pub fn encode_read_request(predicates: &[ReadPredicate]) -> Vec<u8> {
    prompb::ReadRequest {
        queries: predicates
            .iter()
            .map(|p| prompb::Query {
                start_timestamp_ms: p.start_ms,
                end_timestamp_ms: p.end_ms,
                matchers: p.matchers.iter().map(matcher_to_wire).collect(),
                hints: None,
            })
            .collect(),
        accepted_response_types: vec![prompb::ResponseType::Samples as i32],
    }
    .encode_to_vec()
}

/// Parse a serialized read response (sender side)
pub fn parse_read_response(raw: &[u8]) -> Result<Vec<Vec<WireSeries>>> {
    let response = prompb::ReadResponse::decode(raw)?;

    response
        .results
        .into_iter()
        .map(|result| {
            result
                .timeseries
                .into_iter()
                .map(|ts| {
                    let labels = labels_from_wire(ts.labels)?;
                    let samples = ts
                        .samples
                        .into_iter()
                        .map(|s| SamplePoint::new(s.timestamp, s.value))
                        .collect();
                    Ok(WireSeries::new(labels, samples))
                })
                .collect()
        })
        .collect()
}

fn labels_from_wire(labels: Vec<prompb::Label>) -> Result<LabelSet> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in &labels {
        if !seen.insert(label.name.as_str()) {
            return Err(Error::MalformedMessage(format!(
                "duplicate label name '{}' in series",
                label.name
            )));
        }
    }

    Ok(LabelSet::new(
        labels
            .into_iter()
            .map(|l| Label::new(l.name, l.value))
            .collect(),
    ))
}

fn series_to_wire(series: &WireSeries) -> prompb::TimeSeries {
    prompb::TimeSeries {
        labels: series
            .labels
            .iter()
            .map(|l| prompb::Label {
                name: l.name.clone(),
                value: l.value.clone(),
            })
            .collect(),
        samples: series
            .samples
            .iter()
            .map(|s| prompb::Sample {
                value: s.value,
                timestamp: s.timestamp_ms,
            })
            .collect(),
    }
}

fn matcher_from_wire(matcher: prompb::LabelMatcher) -> Result<LabelMatcher> {
    let op = match prompb::MatcherType::try_from(matcher.r#type) {
        Ok(prompb::MatcherType::Eq) => MatchOp::Equal,
        Ok(prompb::MatcherType::Neq) => MatchOp::NotEqual,
        Ok(prompb::MatcherType::Re) => MatchOp::RegexMatch,
        Ok(prompb::MatcherType::Nre) => MatchOp::RegexNoMatch,
        Err(_) => {
            return Err(Error::MalformedMessage(format!(
                "unknown matcher type {} for label '{}'",
                matcher.r#type, matcher.name
            )))
        }
    };
    Ok(LabelMatcher::new(matcher.name, op, matcher.value))
}

fn matcher_to_wire(matcher: &LabelMatcher) -> prompb::LabelMatcher {
    let kind = match matcher.op {
        MatchOp::Equal => prompb::MatcherType::Eq,
        MatchOp::NotEqual => prompb::MatcherType::Neq,
        MatchOp::RegexMatch => prompb::MatcherType::Re,
        MatchOp::RegexNoMatch => prompb::MatcherType::Nre,
    };
    prompb::LabelMatcher {
        r#type: kind as i32,
        name: matcher.name.clone(),
        value: matcher.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_series() -> WireSeries {
        WireSeries::new(
            LabelSet::from_pairs([("__name__", "cpu_usage"), ("host", "a")]),
            vec![SamplePoint::new(1000, 0.5), SamplePoint::new(2000, 0.75)],
        )
    }

    #[test]
    fn test_write_request_through_envelope() {
        let body = encode_envelope(&encode_write_request(&[cpu_series()])).unwrap();

        let raw = decode_envelope(&body).unwrap();
        let series = parse_write_request(&raw).unwrap();

        assert_eq!(series, vec![cpu_series()]);
    }

    #[test]
    fn test_decode_envelope_rejects_garbage() {
        let err = decode_envelope(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_parse_write_request_rejects_truncated_protobuf() {
        let mut raw = encode_write_request(&[cpu_series()]);
        raw.truncate(raw.len() - 3);

        let err = parse_write_request(&raw).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn test_parse_write_request_rejects_duplicate_label_names() {
        let raw = prompb::WriteRequest {
            timeseries: vec![prompb::TimeSeries {
                labels: vec![
                    prompb::Label { name: "host".into(), value: "a".into() },
                    prompb::Label { name: "host".into(), value: "b".into() },
                ],
                samples: vec![],
            }],
        }
        .encode_to_vec();

        assert!(matches!(
            parse_write_request(&raw),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_parse_write_request_rejects_out_of_range_timestamp() {
        let far_future = WireSeries::new(
            LabelSet::from_pairs([("__name__", "up")]),
            vec![SamplePoint::new(1_000, 1.0), SamplePoint::new(9_000_000_000_000_000, 1.0)],
        );
        let err = parse_write_request(&encode_write_request(&[far_future])).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
        assert!(err.is_client_error());

        // Large but representable timestamps still parse
        let late = WireSeries::new(
            LabelSet::from_pairs([("__name__", "up")]),
            vec![SamplePoint::new(8_000_000_000_000_000, 1.0)],
        );
        assert_eq!(
            parse_write_request(&encode_write_request(&[late.clone()])).unwrap(),
            vec![late]
        );
    }

    #[test]
    fn test_empty_write_request_is_valid() {
        let series = parse_write_request(&[]).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_parse_read_request_matchers() {
        let raw = prompb::ReadRequest {
            queries: vec![prompb::Query {
                start_timestamp_ms: 1000,
                end_timestamp_ms: 5000,
                matchers: vec![
                    prompb::LabelMatcher {
                        r#type: prompb::MatcherType::Eq as i32,
                        name: "__name__".into(),
                        value: "cpu_usage".into(),
                    },
                    prompb::LabelMatcher {
                        r#type: prompb::MatcherType::Nre as i32,
                        name: "host".into(),
                        value: "b.*".into(),
                    },
                ],
                hints: Some(prompb::ReadHints {
                    step_ms: 15_000,
                    ..Default::default()
                }),
            }],
            accepted_response_types: vec![prompb::ResponseType::Samples as i32],
        }
        .encode_to_vec();

        let predicates = parse_read_request(&raw).unwrap();
        assert_eq!(predicates.len(), 1);
        let predicate = &predicates[0];
        assert_eq!(predicate.start_ms, 1000);
        assert_eq!(predicate.end_ms, 5000);
        assert_eq!(
            predicate.matchers,
            vec![
                LabelMatcher::new("__name__", MatchOp::Equal, "cpu_usage"),
                LabelMatcher::new("host", MatchOp::RegexNoMatch, "b.*"),
            ]
        );
    }

    #[test]
    fn test_parse_read_request_rejects_unknown_matcher_type() {
        let raw = prompb::ReadRequest {
            queries: vec![prompb::Query {
                start_timestamp_ms: 0,
                end_timestamp_ms: 10,
                matchers: vec![prompb::LabelMatcher {
                    r#type: 42,
                    name: "job".into(),
                    value: "x".into(),
                }],
                hints: None,
            }],
            accepted_response_types: vec![],
        }
        .encode_to_vec();

        let err = parse_read_request(&raw).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn test_read_response_keeps_query_order() {
        let other = WireSeries::new(
            LabelSet::from_pairs([("__name__", "mem")]),
            vec![SamplePoint::new(5, 1.0)],
        );
        let raw = encode_read_response(&[vec![cpu_series()], vec![], vec![other.clone()]]);

        let results = parse_read_response(&raw).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], vec![cpu_series()]);
        assert!(results[1].is_empty());
        assert_eq!(results[2], vec![other]);
    }
}
