// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_analytics::{
    flusher::{Flusher, LogSink, StdoutSink},
    logger, Config, LogAnalyticsServer, LogService, LogStore, QueryEngine, StatsAggregator,
};

#[tokio::main]
pub async fn main() {
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&log_level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Error loading configuration: {e}");
            process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            process::exit(1);
        }
    };

    let (service, handle) = LogService::new(
        LogStore::new(config.buffer_capacity),
        QueryEngine::new(config.query_cache_size),
        StatsAggregator::new(config.hit_rate_window),
    );
    let service_task = tokio::spawn(service.run());

    let cancel = CancellationToken::new();

    let sink: Option<Arc<dyn LogSink + Send + Sync>> = if config.forward_stdout {
        Some(Arc::new(StdoutSink::stdout()))
    } else {
        None
    };
    let flusher = Flusher::new(
        handle.clone(),
        sink,
        config.batch_size,
        config.flush_interval,
    );
    let flusher_task = tokio::spawn(flusher.run(cancel.clone()));

    let server = LogAnalyticsServer::new(handle.clone(), config.max_request_content_length);
    let mut server_task = tokio::spawn(server.serve(listener, cancel.clone()));

    info!(
        "Log analytics started (capacity {}, flush every {}s)",
        config.buffer_capacity,
        config.flush_interval.as_secs()
    );

    let mut exit_code = 0;
    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        result = &mut server_task => {
            error!("Server stopped unexpectedly: {result:?}");
            exit_code = 1;
        }
    }

    cancel.cancel();
    if !server_task.is_finished() {
        if let Err(e) = server_task.await {
            error!("Server task failed: {e}");
        }
    }
    if let Err(e) = flusher_task.await {
        error!("Flusher task failed: {e}");
    }
    if let Err(e) = handle.shutdown() {
        error!("{e}");
    }
    if let Err(e) = service_task.await {
        error!("Log service task failed: {e}");
    }

    info!("Log analytics stopped");
    process::exit(exit_code);
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(logger::Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
        return;
    }
    debug!("Logging subsystem enabled");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
