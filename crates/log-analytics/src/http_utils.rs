// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, response::Builder, HeaderMap},
    Response, StatusCode,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::errors::ValidationError;

pub type Body = Full<Bytes>;
pub type HttpResponse = Response<Body>;

const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type";

/// Response builder carrying the headers every response shares. Any origin may read the API.
fn response_builder(status: StatusCode) -> Builder {
    Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
}

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    response_builder(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
}

/// Serializes `value` as the JSON body of a response with the given status code.
pub fn create_json_response<T: Serialize>(
    value: &T,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    match serde_json::to_vec(value) {
        Ok(body) => response_builder(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body)),
        Err(e) => log_and_create_http_response(
            &format!("Failed to serialize response: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

/// 400 response naming the offending field.
///
/// Response body format:
/// {
///     "message": message,
///     "field": field
/// }
pub fn create_validation_error_response(err: &ValidationError) -> http::Result<HttpResponse> {
    warn!("Rejected request: {err}");
    let body = json!({ "message": err.to_string(), "field": err.field() }).to_string();
    response_builder(StatusCode::BAD_REQUEST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
}

pub fn create_text_response(
    body: String,
    content_type: &'static str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    response_builder(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
}

/// 204 answer to a CORS preflight request.
pub fn create_preflight_response() -> http::Result<HttpResponse> {
    response_builder(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS)
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, CORS_ALLOW_HEADERS)
        .body(Body::default())
}

/// Takes a request's header map, and verifies that the "content-length" and/or "Transfer-Encoding" header
/// is present, valid, and less than the given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs an error (with the given prefix) and
/// returns and HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let Some(content_length_header) = header_map.get(header::CONTENT_LENGTH) else {
        if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
            debug!("Transfer-Encoding header is present: {transfer_encoding_header:?}");
            return None;
        }
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"),
            StatusCode::LENGTH_REQUIRED,
        ));
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
