// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Analytics
//!
//! In-memory log ingestion and query core. Producers submit structured log records over HTTP,
//! the core keeps them in a bounded FIFO buffer, answers filtered most-recent-first queries
//! with a small result cache and reports running statistics.
//!
//! ## Architecture
//!
//! - [`record`]: data model and ingestion validation
//! - [`store`]: bounded append-only buffer with FIFO eviction
//! - [`query`]: filters, ordering, limits and the result cache
//! - [`stats`]: counters, cache hit rate, Prometheus text
//! - [`service`]: single-writer actor owning the store, the engine and the stats
//! - [`flusher`]: periodic batch processing into an optional sink
//! - [`server`]: hyper HTTP/1 boundary
//!
//! Nothing is persisted: the buffer and every counter start empty at process start.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod flusher;
pub mod http_utils;
pub mod logger;
pub mod query;
pub mod record;
pub mod server;
pub mod service;
pub mod stats;
pub mod store;

pub use config::Config;
pub use errors::{ConfigError, ServiceError, SinkError, ValidationError};
pub use query::{LogFilter, LogQueryParams, QueryEngine};
pub use record::{IncomingLog, LogLevel, LogRecord, RecordId};
pub use server::LogAnalyticsServer;
pub use service::{LogService, LogServiceHandle};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use store::LogStore;
