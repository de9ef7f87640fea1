// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use log_analytics::{
    LogAnalyticsServer, LogService, LogServiceHandle, LogStore, QueryEngine, StatsAggregator,
};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub port: u16,
    pub handle: LogServiceHandle,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Starts the actor and the HTTP server on an ephemeral local port.
pub async fn start_test_server(capacity: usize) -> TestServer {
    let (service, handle) = LogService::new(
        LogStore::new(capacity),
        QueryEngine::default(),
        StatsAggregator::default(),
    );
    tokio::spawn(service.run());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let port = listener.local_addr().expect("No local address").port();

    let cancel = CancellationToken::new();
    let server = LogAnalyticsServer::new(handle.clone(), 64 * 1024);
    let server_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        server
            .serve(listener, server_cancel)
            .await
            .expect("Server failed");
    });

    TestServer {
        port,
        handle,
        cancel,
        task,
    }
}

/// Send an HTTP request over TCP and return the status and the decoded JSON body
/// (`Value::Null` for an empty body).
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<&str>,
) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
    let (status, bytes) = send_raw_request(port, uri, method, body).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
}

pub async fn send_raw_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<&str>,
) -> Result<(StatusCode, Bytes), Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Content-Type", "application/json");

    let request = if let Some(body_data) = body {
        request_builder = request_builder.header("Content-Length", body_data.len().to_string());
        request_builder.body(Full::new(Bytes::from(body_data.to_string())))?
    } else {
        request_builder.body(Full::new(Bytes::new()))?
    };
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;

    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, bytes))
}
