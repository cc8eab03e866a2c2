//! Prometheus remote write and remote read handlers
//!
//! Request bodies are snappy-compressed protobuf. Dropping a handler (client
//! disconnect) drops the in-flight store call with it.

use crate::api::ApiState;
use crate::{wire, Error};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Handle Prometheus remote write requests
///
/// POST /receive
/// Content-Encoding: snappy
/// Content-Type: application/x-protobuf
pub async fn handle_remote_write(State(state): State<ApiState>, body: Bytes) -> Response {
    let ctx = state.request_context();
    match state.ingester.handle_write(&body, &ctx).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(), // 204 = success
        Err(e) => error_response(&e),
    }
}

/// Handle Prometheus remote read requests
///
/// POST /read
/// Responds with a snappy-compressed protobuf ReadResponse
pub async fn handle_remote_read(State(state): State<ApiState>, body: Bytes) -> Response {
    let ctx = state.request_context();
    match state.query_node.handle_read(&body, &ctx).await {
        Ok(payload) => (
            [
                (header::CONTENT_TYPE, wire::CONTENT_TYPE),
                (header::CONTENT_ENCODING, wire::CONTENT_ENCODING),
            ],
            payload,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// HTTP status for a failed request
pub fn status_for(error: &Error) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if error.is_readiness_error()
        || matches!(error, Error::DeadlineExceeded | Error::Cancelled)
    {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(error: &Error) -> Response {
    (status_for(error), error.to_string()).into_response()
}
