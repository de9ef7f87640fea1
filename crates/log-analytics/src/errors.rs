// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the log analytics core.

/// Malformed caller input. Surfaced at the boundary as a 4xx response naming the field,
/// never fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{0}' is required and must not be empty")]
    MissingField(&'static str),

    #[error("Unrecognized level '{0}', expected one of DEBUG, INFO, WARNING, ERROR, CRITICAL")]
    UnknownLevel(String),

    #[error("Limit must be a non-negative integer, got '{0}'")]
    InvalidLimit(String),

    #[error("Limit {limit} exceeds the maximum of {max}")]
    LimitTooLarge { limit: u64, max: usize },

    #[error("Field '{field}' is not a valid timestamp: '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },
}

impl ValidationError {
    /// Name of the offending input field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(field) => field,
            ValidationError::UnknownLevel(_) => "level",
            ValidationError::InvalidLimit(_) | ValidationError::LimitTooLarge { .. } => "limit",
            ValidationError::InvalidTimestamp { field, .. } => field,
        }
    }
}

/// Failures talking to the log service actor.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to send {0} command: log service is not running")]
    Send(&'static str),

    #[error("Failed to receive {0} response: log service dropped the request")]
    Receive(&'static str),
}

/// Failures writing a batch to a downstream sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write log batch: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid process configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
