// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::http_utils::{
    create_json_response, create_preflight_response, create_text_response,
    create_validation_error_response, log_and_create_http_response,
    verify_request_content_length, HttpResponse,
};
use crate::errors::ValidationError;
use crate::query::{LogFilter, LogQueryParams, QueryOutcome, MAX_QUERY_LIMIT};
use crate::record::{IncomingLog, LogRecord};
use crate::service::LogServiceHandle;

const LOGS_ENDPOINT_PATH: &str = "/logs";
const QUERY_ENDPOINT_PATH: &str = "/logs/query";
const SEARCH_ENDPOINT_PATH: &str = "/logs/search";
const TRACE_ENDPOINT_PREFIX: &str = "/logs/trace/";
const STATS_ENDPOINT_PATH: &str = "/stats";
const LEGACY_STATS_ENDPOINT_PATH: &str = "/stats/legacy";
const METRICS_ENDPOINT_PATH: &str = "/metrics";
const HEALTH_ENDPOINT_PATH: &str = "/health";
const READY_ENDPOINT_PATH: &str = "/ready";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
const READY_TIMEOUT: Duration = Duration::from_secs(1);

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP boundary in front of the log service. Cheap to share: every connection task holds an
/// `Arc` to it.
#[derive(Debug, Clone)]
pub struct LogAnalyticsServer {
    handle: LogServiceHandle,
    max_request_content_length: usize,
}

impl LogAnalyticsServer {
    pub fn new(handle: LogServiceHandle, max_request_content_length: usize) -> Self {
        LogAnalyticsServer {
            handle,
            max_request_content_length,
        }
    }

    /// Accepts connections on `listener` until `cancel` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let server = Arc::new(self);
        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let server = Arc::clone(&server);
            async move { server.handle_request(req).await }
        });

        if let Ok(addr) = listener.local_addr() {
            info!("Log analytics server listening on {addr}");
        }

        let http = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {e:?}");
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                () = cancel.cancelled() => {
                    debug!("Server cancelled, dropping {} open connections", joinset.len());
                    joinset.shutdown().await;
                    return Ok(());
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let http = http.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = http.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    /// Routes one request. Generic over the body so it can be driven without a socket.
    pub async fn handle_request<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: hyper::body::Body,
        B::Error: Into<ServerError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match (&method, path.as_str()) {
            (&Method::OPTIONS, _) => create_preflight_response(),
            (&Method::POST, LOGS_ENDPOINT_PATH) => self.ingest_handler(req).await,
            (&Method::POST, QUERY_ENDPOINT_PATH) => self.query_handler(req).await,
            (&Method::GET, SEARCH_ENDPOINT_PATH) => {
                let params = LogQueryParams::from_query_string(req.uri().query().unwrap_or(""));
                self.run_query(params).await
            }
            (&Method::GET, trace_path) if trace_path.starts_with(TRACE_ENDPOINT_PREFIX) => {
                let trace_id = decode_path_segment(&trace_path[TRACE_ENDPOINT_PREFIX.len()..]);
                self.trace_handler(&trace_id).await
            }
            (&Method::GET, STATS_ENDPOINT_PATH) => match self.handle.stats().await {
                Ok(stats) => create_json_response(&stats, StatusCode::OK),
                Err(e) => service_error_response(e),
            },
            (&Method::GET, LEGACY_STATS_ENDPOINT_PATH) => match self.handle.legacy_stats().await {
                Ok(stats) => create_json_response(&stats, StatusCode::OK),
                Err(e) => service_error_response(e),
            },
            (&Method::GET, METRICS_ENDPOINT_PATH) => match self.handle.metrics().await {
                Ok(text) => create_text_response(text, PROMETHEUS_CONTENT_TYPE, StatusCode::OK),
                Err(e) => service_error_response(e),
            },
            (&Method::GET, HEALTH_ENDPOINT_PATH) => match self.handle.stats().await {
                Ok(stats) => create_json_response(
                    &json!({ "status": "healthy", "buffer_size": stats.buffer_size }),
                    StatusCode::OK,
                ),
                Err(e) => service_error_response(e),
            },
            (&Method::GET, READY_ENDPOINT_PATH) => self.ready_handler().await,
            _ => {
                debug!("No route for {method} {path}");
                create_json_response(&json!({ "message": "Not found" }), StatusCode::NOT_FOUND)
            }
        }
    }

    async fn ingest_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: hyper::body::Body,
        B::Error: Into<ServerError>,
    {
        let entry: IncomingLog = match self.read_json_body(req, "Error ingesting log").await {
            Ok(Some(entry)) => entry,
            Ok(None) => IncomingLog::default(),
            Err(response) => return response,
        };

        match self.handle.ingest(entry).await {
            Ok(Ok(receipt)) => {
                debug!("Accepted log {} (buffer size {})", receipt.id, receipt.buffer_size);
                create_json_response(
                    &json!({
                        "status": "accepted",
                        "log_id": receipt.id,
                        "buffer_size": receipt.buffer_size,
                    }),
                    StatusCode::OK,
                )
            }
            Ok(Err(e)) => create_validation_error_response(&e),
            Err(e) => service_error_response(e),
        }
    }

    async fn query_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: hyper::body::Body,
        B::Error: Into<ServerError>,
    {
        let params: LogQueryParams = match self.read_json_body(req, "Error querying logs").await {
            Ok(params) => params.unwrap_or_default(),
            Err(response) => return response,
        };
        let filter = match LogFilter::try_from(params) {
            Ok(filter) if filter.limit > MAX_QUERY_LIMIT => {
                return create_validation_error_response(&ValidationError::LimitTooLarge {
                    limit: u64::try_from(filter.limit).unwrap_or(u64::MAX),
                    max: MAX_QUERY_LIMIT,
                });
            }
            Ok(filter) => filter,
            Err(e) => return create_validation_error_response(&e),
        };
        self.execute_query(filter).await
    }

    async fn run_query(&self, params: LogQueryParams) -> http::Result<HttpResponse> {
        match LogFilter::try_from(params) {
            Ok(filter) => self.execute_query(filter).await,
            Err(e) => create_validation_error_response(&e),
        }
    }

    async fn execute_query(&self, filter: LogFilter) -> http::Result<HttpResponse> {
        match self.handle.query(filter).await {
            Ok(outcome) => query_response(outcome),
            Err(e) => service_error_response(e),
        }
    }

    async fn trace_handler(&self, trace_id: &str) -> http::Result<HttpResponse> {
        if trace_id.is_empty() {
            return create_json_response(&json!({ "message": "Not found" }), StatusCode::NOT_FOUND);
        }
        let filter = LogFilter::default()
            .with_trace_id(trace_id)
            .with_limit(usize::MAX);
        match self.handle.query(filter).await {
            Ok(outcome) if outcome.records.is_empty() => {
                debug!("No logs found for trace {trace_id}");
                create_json_response(
                    &json!({ "message": format!("No logs found for trace {trace_id}") }),
                    StatusCode::NOT_FOUND,
                )
            }
            Ok(outcome) => query_response(outcome),
            Err(e) => service_error_response(e),
        }
    }

    async fn ready_handler(&self) -> http::Result<HttpResponse> {
        match tokio::time::timeout(READY_TIMEOUT, self.handle.stats()).await {
            Ok(Ok(_)) => create_json_response(&json!({ "status": "ready" }), StatusCode::OK),
            Ok(Err(e)) => log_and_create_http_response(
                &format!("Log service not ready: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            Err(_) => log_and_create_http_response(
                "Log service not ready: timed out",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    /// Verifies the length headers and decodes the body. An empty body yields `Ok(None)`.
    async fn read_json_body<B, T>(
        &self,
        req: Request<B>,
        error_message_prefix: &str,
    ) -> Result<Option<T>, http::Result<HttpResponse>>
    where
        B: hyper::body::Body,
        B::Error: Into<ServerError>,
        T: DeserializeOwned,
    {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            self.max_request_content_length,
            error_message_prefix,
        ) {
            return Err(response);
        }

        // Chunked bodies are not covered by the Content-Length check, so cap the stream too.
        let bytes = match Limited::new(body, self.max_request_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Err(log_and_create_http_response(
                    &format!("{error_message_prefix}: Payload too large"),
                    StatusCode::PAYLOAD_TOO_LARGE,
                ));
            }
            Err(e) => {
                return Err(log_and_create_http_response(
                    &format!("{error_message_prefix}: Failed to read request body: {e}"),
                    StatusCode::BAD_REQUEST,
                ));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid JSON body: {e}"),
                StatusCode::BAD_REQUEST,
            )
        })
    }
}

/// Percent-decodes one path segment. `+` stays literal, as it does in a path.
fn decode_path_segment(raw: &str) -> String {
    let escaped = raw
        .replace('+', "%2B")
        .replace('&', "%26")
        .replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(segment, _)| segment.into_owned())
        .unwrap_or_default()
}

fn query_response(outcome: QueryOutcome) -> http::Result<HttpResponse> {
    #[derive(serde::Serialize)]
    struct QueryResponse {
        results: Vec<LogRecord>,
        count: usize,
        cached: bool,
    }

    create_json_response(
        &QueryResponse {
            count: outcome.records.len(),
            results: outcome.records,
            cached: outcome.cache_hit,
        },
        StatusCode::OK,
    )
}

fn service_error_response(err: crate::errors::ServiceError) -> http::Result<HttpResponse> {
    log_and_create_http_response(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}
