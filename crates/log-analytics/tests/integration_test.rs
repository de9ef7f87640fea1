// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{send_raw_request, send_tcp_request, start_test_server};
use hyper::StatusCode;
use log_analytics::flusher::Flusher;
use serde_json::json;
use std::time::Duration;

fn log_body(level: &str, service: &str, message: &str) -> String {
    json!({ "level": level, "service": service, "message": message }).to_string()
}

#[tokio::test]
async fn test_ingest_then_search_over_tcp() {
    let server = start_test_server(100).await;

    for (level, message) in [("INFO", "one"), ("ERROR", "two"), ("INFO", "three")] {
        let (status, json) = send_tcp_request(
            server.port,
            "/logs",
            "POST",
            Some(&log_body(level, "auth", message)),
        )
        .await
        .expect("Failed to send log");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "accepted");
    }

    let (status, json) = send_tcp_request(server.port, "/logs/search?service=auth", "GET", None)
        .await
        .expect("Failed to search");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 3);
    assert_eq!(json["results"][0]["message"], "three");
    assert_eq!(json["results"][2]["message"], "one");

    let (_, json) = send_tcp_request(
        server.port,
        "/logs/query",
        "POST",
        Some(r#"{"level":"ERROR","limit":10}"#),
    )
    .await
    .expect("Failed to query");
    assert_eq!(json["count"], 1);
    assert_eq!(json["results"][0]["message"], "two");
    assert!(json["results"][0]["id"].is_u64());

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_producer_payload_with_naive_timestamp() {
    let server = start_test_server(100).await;
    let body = json!({
        "timestamp": "2024-05-01T10:15:30.123456",
        "level": "WARNING",
        "service": "payment-service",
        "message": "Slow response",
        "trace_id": "trace-42",
        "user_id": "user-7",
    })
    .to_string();

    let (status, json) = send_tcp_request(server.port, "/logs", "POST", Some(&body))
        .await
        .expect("Failed to send log");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["log_id"], 1);

    let (status, json) = send_tcp_request(server.port, "/logs/trace/trace-42", "GET", None)
        .await
        .expect("Failed to look up trace");
    assert_eq!(status, StatusCode::OK);
    let record = &json["results"][0];
    assert_eq!(record["user_id"], "user-7");
    assert_eq!(record["timestamp"], "2024-05-01T10:15:30.123456Z");

    let (_, json) = send_tcp_request(
        server.port,
        "/logs/search?start_time=2024-05-01T10:00:00&end_time=2024-05-01T11:00:00",
        "GET",
        None,
    )
    .await
    .expect("Failed to search");
    assert_eq!(json["count"], 1);

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_validation_failures_are_reported() {
    let server = start_test_server(100).await;

    let (status, json) = send_tcp_request(
        server.port,
        "/logs",
        "POST",
        Some(&log_body("TRACE", "auth", "x")),
    )
    .await
    .expect("Failed to send log");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["field"], "level");

    let (status, _) = send_tcp_request(server.port, "/logs", "POST", Some("[1, 2"))
        .await
        .expect("Failed to send log");
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send_tcp_request(server.port, "/logs/search?limit=-1", "GET", None)
        .await
        .expect("Failed to search");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["field"], "limit");

    let (_, stats) = send_tcp_request(server.port, "/stats", "GET", None)
        .await
        .expect("Failed to get stats");
    assert_eq!(stats["total_received"], 0);

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_eviction_and_stats() {
    let server = start_test_server(2).await;

    for message in ["A", "B", "C"] {
        send_tcp_request(
            server.port,
            "/logs",
            "POST",
            Some(&log_body("INFO", "svc", message)),
        )
        .await
        .expect("Failed to send log");
    }

    let (_, json) = send_tcp_request(server.port, "/logs/search", "GET", None)
        .await
        .expect("Failed to search");
    let messages: Vec<&str> = json["results"]
        .as_array()
        .expect("results is an array")
        .iter()
        .map(|r| r["message"].as_str().expect("message is a string"))
        .collect();
    assert_eq!(messages, vec!["C", "B"]);

    // the second identical search is served from the cache
    let (_, json) = send_tcp_request(server.port, "/logs/search", "GET", None)
        .await
        .expect("Failed to search");
    assert_eq!(json["cached"], true);

    let (_, stats) = send_tcp_request(server.port, "/stats", "GET", None)
        .await
        .expect("Failed to get stats");
    assert_eq!(stats["total_received"], 3);
    assert_eq!(stats["buffer_size"], 2);
    assert_eq!(stats["cache_hit_rate"], 0.5);

    let (_, legacy) = send_tcp_request(server.port, "/stats/legacy", "GET", None)
        .await
        .expect("Failed to get legacy stats");
    assert_eq!(legacy, json!({ "total_logs": 2 }));

    let (status, metrics) = send_raw_request(server.port, "/metrics", "GET", None)
        .await
        .expect("Failed to get metrics");
    assert_eq!(status, StatusCode::OK);
    let metrics = String::from_utf8(metrics.to_vec()).expect("metrics are utf-8");
    assert!(metrics.contains("logs_evicted_total 1\n"));
    assert!(metrics.contains("log_buffer_size 2\n"));

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_flusher_drives_total_processed() {
    let server = start_test_server(100).await;

    for i in 0..5 {
        send_tcp_request(
            server.port,
            "/logs",
            "POST",
            Some(&log_body("DEBUG", "worker", &format!("job {i}"))),
        )
        .await
        .expect("Failed to send log");
    }

    let flusher = Flusher::new(server.handle.clone(), None, 2, Duration::from_secs(60));
    assert_eq!(flusher.flush().await, 5);

    let (_, stats) = send_tcp_request(server.port, "/stats", "GET", None)
        .await
        .expect("Failed to get stats");
    assert_eq!(stats["total_received"], 5);
    assert_eq!(stats["total_processed"], 5);

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_health_ready_and_unknown_routes() {
    let server = start_test_server(10).await;

    let (status, json) = send_tcp_request(server.port, "/health", "GET", None)
        .await
        .expect("Failed to get health");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "status": "healthy", "buffer_size": 0 }));

    let (status, _) = send_tcp_request(server.port, "/ready", "GET", None)
        .await
        .expect("Failed to get readiness");
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send_tcp_request(server.port, "/does-not-exist", "GET", None)
        .await
        .expect("Failed to send request");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "Not found");

    let (status, _) = send_tcp_request(server.port, "/logs/trace/unknown", "GET", None)
        .await
        .expect("Failed to look up trace");
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.cancel.cancel();
    server.task.await.expect("Server task panicked");
}
