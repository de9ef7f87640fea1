// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, append-only, in-memory buffer of log records.
//!
//! Records are kept in insertion order in a `VecDeque`. When an append pushes the store past
//! its capacity the oldest record is evicted (FIFO). Eviction is the only backpressure: the
//! store never refuses a valid record, it drops the oldest one instead and logs a warning.
//!
//! The store also keeps a processing watermark for the [`crate::flusher::Flusher`]. Ids are
//! assigned contiguously, so the buffer is always sorted by id and "unprocessed" is simply
//! the suffix with `id > processed_through`.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::errors::ValidationError;
use crate::record::{IncomingLog, LogRecord, RecordId};

/// Default number of records kept in memory.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct LogStore {
    records: VecDeque<LogRecord>,
    capacity: usize,
    next_id: RecordId,
    /// Number of successful appends. Cached query results are only valid for one generation.
    generation: u64,
    total_evicted: u64,
    processed_through: RecordId,
}

impl Default for LogStore {
    fn default() -> Self {
        LogStore::new(DEFAULT_CAPACITY)
    }
}

impl LogStore {
    /// Creates an empty store. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LogStore {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            next_id: 1,
            generation: 0,
            total_evicted: 0,
            processed_through: 0,
        }
    }

    /// Validates and appends an entry, timestamped now when it carries no timestamp.
    pub fn append(&mut self, entry: IncomingLog) -> Result<RecordId, ValidationError> {
        self.append_at(entry, Utc::now())
    }

    /// Same as [`LogStore::append`] with an explicit ingestion clock.
    pub fn append_at(
        &mut self,
        entry: IncomingLog,
        now: DateTime<Utc>,
    ) -> Result<RecordId, ValidationError> {
        let id = self.next_id;
        let record = entry.into_record(id, now)?;

        self.records.push_back(record);
        self.next_id += 1;
        self.generation += 1;

        while self.records.len() > self.capacity {
            if let Some(evicted) = self.records.pop_front() {
                self.total_evicted += 1;
                let unprocessed = evicted.id > self.processed_through;
                if self.total_evicted == 1 {
                    warn!(
                        "Log store full ({} records), evicting oldest records",
                        self.capacity
                    );
                } else {
                    debug!("Evicted log record {} (unprocessed: {unprocessed})", evicted.id);
                }
                if unprocessed {
                    // Keep the watermark consistent with the buffer contents.
                    self.processed_through = evicted.id;
                    warn!("Log record {} evicted before it was processed", evicted.id);
                }
            }
        }

        Ok(id)
    }

    /// Current contents in insertion order.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.iter().cloned().collect()
    }

    /// Most-recent-first view over the buffered records.
    pub fn iter_recent(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }

    pub fn processed_through(&self) -> RecordId {
        self.processed_through
    }

    /// Number of buffered records not yet marked processed.
    pub fn pending_count(&self) -> usize {
        self.records.len() - self.first_unprocessed_index()
    }

    /// Up to `max` unprocessed records, oldest first.
    pub fn unprocessed(&self, max: usize) -> Vec<LogRecord> {
        self.records
            .iter()
            .skip(self.first_unprocessed_index())
            .take(max)
            .cloned()
            .collect()
    }

    /// Advances the processing watermark to `through` and returns how many buffered records
    /// became processed. Moving the watermark backwards is a no-op.
    pub fn mark_processed(&mut self, through: RecordId) -> usize {
        if through <= self.processed_through {
            return 0;
        }
        let before = self.pending_count();
        self.processed_through = through.min(self.next_id - 1);
        before - self.pending_count()
    }

    fn first_unprocessed_index(&self) -> usize {
        self.records
            .partition_point(|record| record.id <= self.processed_through)
    }
}
