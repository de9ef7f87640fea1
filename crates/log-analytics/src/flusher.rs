// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic batch drain of unprocessed records.
//!
//! Every `interval` the flusher pulls up to `batch_size` unprocessed records from the log
//! service, hands them to a [`LogSink`] and advances the processing watermark once the sink
//! accepted the batch. A failing sink leaves the records pending so the next tick retries them,
//! unless they are evicted first. Without a sink a drained batch counts as processed directly.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::SinkError;
use crate::record::LogRecord;
use crate::service::LogServiceHandle;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Downstream destination for processed batches.
#[async_trait]
pub trait LogSink {
    async fn write_batch(&self, batch: &[LogRecord]) -> Result<(), SinkError>;
}

/// Writes each record as one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

pub type StdoutSink = JsonLinesSink<tokio::io::Stdout>;

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        JsonLinesSink::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> LogSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_batch(&self, batch: &[LogRecord]) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

pub struct Flusher {
    handle: LogServiceHandle,
    sink: Option<Arc<dyn LogSink + Send + Sync>>,
    batch_size: usize,
    interval: Duration,
}

impl Flusher {
    pub fn new(
        handle: LogServiceHandle,
        sink: Option<Arc<dyn LogSink + Send + Sync>>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Flusher {
            handle,
            sink,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// Drains every pending batch. Returns how many records were marked processed.
    pub async fn flush(&self) -> usize {
        let mut flushed = 0;
        loop {
            let batch = match self.handle.take_unprocessed(self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to fetch unprocessed logs: {e}");
                    return flushed;
                }
            };
            let Some(last_id) = batch.last().map(|record| record.id) else {
                return flushed;
            };

            if let Some(sink) = &self.sink {
                if let Err(e) = sink.write_batch(&batch).await {
                    error!("Failed to write batch of {} logs: {e}", batch.len());
                    return flushed;
                }
            }

            match self.handle.mark_processed(last_id).await {
                Ok(count) => {
                    debug!("Processed batch of {count} logs");
                    flushed += count;
                }
                Err(e) => {
                    error!("Failed to mark logs processed: {e}");
                    return flushed;
                }
            }

            if batch.len() < self.batch_size {
                return flushed;
            }
        }
    }

    /// Flushes on every tick until `cancel` fires, then flushes one last time.
    pub async fn run(self, cancel: CancellationToken) {
        if let Err(e) = self.handle.set_processor_active(true) {
            error!("{e}");
        }
        let mut flush_interval = tokio::time::interval(self.interval);
        flush_interval.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = flush_interval.tick() => {
                    self.flush().await;
                }
                () = cancel.cancelled() => {
                    debug!("Flusher cancelled, running final flush");
                    let flushed = self.flush().await;
                    debug!("Final flush processed {flushed} logs");
                    break;
                }
            }
        }
        if let Err(e) = self.handle.set_processor_active(false) {
            debug!("Could not report flusher stop: {e}");
        }
    }
}
