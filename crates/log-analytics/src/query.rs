// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filter evaluation over the log store, with a small result cache.
//!
//! Results are always most recent first (reverse insertion order) and truncated to the
//! filter's limit. The cache is keyed by the normalized [`LogFilter`] and is dropped as a
//! whole whenever the store generation moves, since any append changes what "most recent"
//! means for every filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::errors::ValidationError;
use crate::record::{parse_timestamp, LogLevel, LogRecord};
use crate::store::LogStore;

pub const DEFAULT_QUERY_LIMIT: usize = 100;
/// Upper bound on `limit` in a `POST /logs/query` body. Other callers are only bounded by
/// what the store holds.
pub const MAX_QUERY_LIMIT: usize = 1_000;
pub const DEFAULT_CACHE_ENTRIES: usize = 256;

/// Query parameters as received on the wire, either as a JSON body or a URL query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQueryParams {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Kept as a raw JSON value so that negative and non-numeric limits are reported as
    /// validation errors instead of body parse errors.
    #[serde(default)]
    pub limit: Option<Value>,
}

impl LogQueryParams {
    /// Parses `level=ERROR&service=auth&limit=10` style query strings. Unknown keys are
    /// ignored; a repeated key keeps its last value.
    pub fn from_query_string(query: &str) -> Self {
        let mut params = LogQueryParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "service" => params.service = Some(value),
                "level" => params.level = Some(value),
                "trace_id" => params.trace_id = Some(value),
                "start_time" => params.start_time = Some(value),
                "end_time" => params.end_time = Some(value),
                "limit" => params.limit = Some(Value::String(value)),
                _ => {}
            }
        }
        params
    }
}

/// A validated, normalized filter. Absent fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogFilter {
    pub service: Option<String>,
    pub level: Option<LogLevel>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        LogFilter {
            service: None,
            level: None,
            trace_id: None,
            start_time: None,
            end_time: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl LogFilter {
    #[must_use]
    pub fn with_service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// True when every supplied field equals the record's field. Time bounds are inclusive.
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.service.as_ref().map_or(true, |s| *s == record.service)
            && self.level.map_or(true, |l| l == record.level)
            && self
                .trace_id
                .as_ref()
                .map_or(true, |t| record.trace_id.as_ref() == Some(t))
            && self.start_time.map_or(true, |start| record.timestamp >= start)
            && self.end_time.map_or(true, |end| record.timestamp <= end)
    }
}

impl TryFrom<LogQueryParams> for LogFilter {
    type Error = ValidationError;

    fn try_from(params: LogQueryParams) -> Result<Self, Self::Error> {
        let level = match non_empty(params.level) {
            Some(level) => Some(level.parse::<LogLevel>()?),
            None => None,
        };
        let start_time = non_empty(params.start_time)
            .map(|raw| parse_timestamp("start_time", &raw))
            .transpose()?;
        let end_time = non_empty(params.end_time)
            .map(|raw| parse_timestamp("end_time", &raw))
            .transpose()?;

        Ok(LogFilter {
            service: non_empty(params.service),
            level,
            trace_id: non_empty(params.trace_id),
            start_time,
            end_time,
            limit: parse_limit(params.limit.as_ref())?,
        })
    }
}

fn parse_limit(value: Option<&Value>) -> Result<usize, ValidationError> {
    let limit = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_QUERY_LIMIT),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ValidationError::InvalidLimit(n.to_string()))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(DEFAULT_QUERY_LIMIT),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| ValidationError::InvalidLimit(s.clone()))?,
        Some(other) => return Err(ValidationError::InvalidLimit(other.to_string())),
    };

    // Anything past the store size just returns everything that matches.
    Ok(usize::try_from(limit).unwrap_or(usize::MAX))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub records: Vec<LogRecord>,
    pub cache_hit: bool,
}

#[derive(Debug)]
pub struct QueryEngine {
    cache: HashMap<LogFilter, Vec<LogRecord>>,
    /// Insertion order of cache keys, oldest first.
    order: VecDeque<LogFilter>,
    max_entries: usize,
    generation: u64,
}

impl Default for QueryEngine {
    fn default() -> Self {
        QueryEngine::new(DEFAULT_CACHE_ENTRIES)
    }
}

impl QueryEngine {
    /// `max_entries` of 0 disables caching.
    pub fn new(max_entries: usize) -> Self {
        QueryEngine {
            cache: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
            generation: 0,
        }
    }

    pub fn query(&mut self, store: &LogStore, filter: &LogFilter) -> QueryOutcome {
        if self.generation != store.generation() {
            self.invalidate();
            self.generation = store.generation();
        }

        if let Some(records) = self.cache.get(filter) {
            debug!("Query served from cache ({} records)", records.len());
            return QueryOutcome {
                records: records.clone(),
                cache_hit: true,
            };
        }

        let records = Self::evaluate(store, filter);
        self.insert(filter.clone(), records.clone());
        QueryOutcome {
            records,
            cache_hit: false,
        }
    }

    /// Uncached scan: matching records, most recent first, at most `filter.limit` of them.
    pub fn evaluate(store: &LogStore, filter: &LogFilter) -> Vec<LogRecord> {
        if filter.limit == 0 {
            return Vec::new();
        }
        store
            .iter_recent()
            .filter(|record| filter.matches(record))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn insert(&mut self, filter: LogFilter, records: Vec<LogRecord>) {
        if self.max_entries == 0 {
            return;
        }
        while self.cache.len() >= self.max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.cache.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(filter.clone());
        self.cache.insert(filter, records);
    }
}
