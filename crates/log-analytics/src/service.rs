// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor that owns the log store, the query engine and the stats aggregator.
//!
//! Every operation, read or write, is a command processed one at a time by [`LogService::run`].
//! This is the single-writer discipline for the store: appends never interleave, and a query
//! sees either the state before an append or the state after it, never a partial one.
//! [`LogServiceHandle`] is cheap to clone and is what the HTTP layer and the flusher hold.

use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::errors::{ServiceError, ValidationError};
use crate::query::{LogFilter, QueryEngine, QueryOutcome};
use crate::record::{IncomingLog, LogRecord, RecordId};
use crate::stats::{LegacyStats, StatsAggregator, StatsSnapshot};
use crate::store::LogStore;

/// Result of a successful ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    pub id: RecordId,
    pub buffer_size: usize,
}

#[derive(Debug)]
pub enum LogServiceCommand {
    Ingest {
        entry: IncomingLog,
        response_tx: oneshot::Sender<Result<IngestReceipt, ValidationError>>,
    },
    Query {
        filter: LogFilter,
        response_tx: oneshot::Sender<QueryOutcome>,
    },
    Snapshot(oneshot::Sender<Vec<LogRecord>>),
    Stats(oneshot::Sender<StatsSnapshot>),
    LegacyStats(oneshot::Sender<LegacyStats>),
    Metrics(oneshot::Sender<String>),
    TakeUnprocessed {
        max: usize,
        response_tx: oneshot::Sender<Vec<LogRecord>>,
    },
    MarkProcessed {
        through: RecordId,
        response_tx: oneshot::Sender<usize>,
    },
    ProcessorActive(bool),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct LogServiceHandle {
    tx: mpsc::UnboundedSender<LogServiceCommand>,
}

impl LogServiceHandle {
    /// Validates and stores an entry. The outer error is a service failure, the inner one a
    /// validation failure to report back to the producer.
    pub async fn ingest(
        &self,
        entry: IncomingLog,
    ) -> Result<Result<IngestReceipt, ValidationError>, ServiceError> {
        self.request("ingest", |response_tx| LogServiceCommand::Ingest {
            entry,
            response_tx,
        })
        .await
    }

    pub async fn query(&self, filter: LogFilter) -> Result<QueryOutcome, ServiceError> {
        self.request("query", |response_tx| LogServiceCommand::Query {
            filter,
            response_tx,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Vec<LogRecord>, ServiceError> {
        self.request("snapshot", LogServiceCommand::Snapshot).await
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, ServiceError> {
        self.request("stats", LogServiceCommand::Stats).await
    }

    pub async fn legacy_stats(&self) -> Result<LegacyStats, ServiceError> {
        self.request("legacy_stats", LogServiceCommand::LegacyStats)
            .await
    }

    pub async fn metrics(&self) -> Result<String, ServiceError> {
        self.request("metrics", LogServiceCommand::Metrics).await
    }

    pub async fn take_unprocessed(&self, max: usize) -> Result<Vec<LogRecord>, ServiceError> {
        self.request("take_unprocessed", |response_tx| {
            LogServiceCommand::TakeUnprocessed { max, response_tx }
        })
        .await
    }

    pub async fn mark_processed(&self, through: RecordId) -> Result<usize, ServiceError> {
        self.request("mark_processed", |response_tx| {
            LogServiceCommand::MarkProcessed {
                through,
                response_tx,
            }
        })
        .await
    }

    /// Reports a flusher starting (`true`) or stopping (`false`).
    pub fn set_processor_active(&self, active: bool) -> Result<(), ServiceError> {
        self.tx
            .send(LogServiceCommand::ProcessorActive(active))
            .map_err(|_| ServiceError::Send("processor_active"))
    }

    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.tx
            .send(LogServiceCommand::Shutdown)
            .map_err(|_| ServiceError::Send("shutdown"))
    }

    async fn request<T>(
        &self,
        name: &'static str,
        command: impl FnOnce(oneshot::Sender<T>) -> LogServiceCommand,
    ) -> Result<T, ServiceError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(command(response_tx))
            .map_err(|_| ServiceError::Send(name))?;
        response_rx.await.map_err(|_| ServiceError::Receive(name))
    }
}

pub struct LogService {
    store: LogStore,
    engine: QueryEngine,
    stats: StatsAggregator,
    rx: mpsc::UnboundedReceiver<LogServiceCommand>,
}

impl LogService {
    pub fn new(
        store: LogStore,
        engine: QueryEngine,
        stats: StatsAggregator,
    ) -> (Self, LogServiceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = LogService {
            store,
            engine,
            stats,
            rx,
        };
        (service, LogServiceHandle { tx })
    }

    pub async fn run(mut self) {
        debug!(
            "Log service started (capacity {} records)",
            self.store.capacity()
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                LogServiceCommand::Ingest { entry, response_tx } => {
                    let started = Instant::now();
                    let result = self.ingest(entry);
                    self.stats.observe_ingest_latency(started.elapsed());
                    if response_tx.send(result).is_err() {
                        error!("Failed to send ingest response - receiver dropped");
                    }
                }

                LogServiceCommand::Query {
                    filter,
                    response_tx,
                } => {
                    let started = Instant::now();
                    let outcome = self.engine.query(&self.store, &filter);
                    self.stats.observe_query_duration(started.elapsed());
                    self.stats.record_query(outcome.cache_hit);
                    if response_tx.send(outcome).is_err() {
                        error!("Failed to send query response - receiver dropped");
                    }
                }

                LogServiceCommand::Snapshot(response_tx) => {
                    if response_tx.send(self.store.snapshot()).is_err() {
                        error!("Failed to send snapshot response - receiver dropped");
                    }
                }

                LogServiceCommand::Stats(response_tx) => {
                    if response_tx.send(self.stats.snapshot()).is_err() {
                        error!("Failed to send stats response - receiver dropped");
                    }
                }

                LogServiceCommand::LegacyStats(response_tx) => {
                    if response_tx.send(self.stats.legacy()).is_err() {
                        error!("Failed to send legacy stats response - receiver dropped");
                    }
                }

                LogServiceCommand::Metrics(response_tx) => {
                    if response_tx.send(self.stats.render_prometheus()).is_err() {
                        error!("Failed to send metrics response - receiver dropped");
                    }
                }

                LogServiceCommand::TakeUnprocessed { max, response_tx } => {
                    if response_tx.send(self.store.unprocessed(max)).is_err() {
                        error!("Failed to send unprocessed batch - receiver dropped");
                    }
                }

                LogServiceCommand::MarkProcessed {
                    through,
                    response_tx,
                } => {
                    let count = self.store.mark_processed(through);
                    self.stats.record_processed(count);
                    if response_tx.send(count).is_err() {
                        error!("Failed to send mark_processed response - receiver dropped");
                    }
                }

                LogServiceCommand::ProcessorActive(active) => {
                    self.stats.set_processor_active(active);
                }

                LogServiceCommand::Shutdown => {
                    debug!("Log service shutting down");
                    break;
                }
            }
        }

        debug!("Log service stopped");
    }

    fn ingest(&mut self, entry: IncomingLog) -> Result<IngestReceipt, ValidationError> {
        let evicted_before = self.store.total_evicted();
        let id = self.store.append(entry).map_err(|e| {
            debug!("Rejected log entry: {e}");
            e
        })?;

        let buffer_size = self.store.len();
        // The store always keeps at least the newest record.
        if let Some(record) = self.store.iter_recent().next() {
            self.stats.record_ingest(record.level, buffer_size);
        }
        self.stats
            .record_eviction(self.store.total_evicted() - evicted_before);

        Ok(IngestReceipt { id, buffer_size })
    }
}
