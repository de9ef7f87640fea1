// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::flusher::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};
use crate::query::DEFAULT_CACHE_ENTRIES;
use crate::stats::DEFAULT_HIT_RATE_WINDOW;
use crate::store::DEFAULT_CAPACITY;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONTENT_LENGTH: usize = 1024 * 1024;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Process configuration, read from `LOG_ANALYTICS_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bind address of the HTTP server
    pub host: String,
    pub port: u16,
    /// Maximum number of records kept in memory
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Number of distinct filters whose results are cached, 0 disables the cache
    pub query_cache_size: usize,
    /// Number of recent queries the cache hit rate is computed over
    pub hit_rate_window: usize,
    pub max_request_content_length: usize,
    /// Write processed batches to stdout as JSON lines
    pub forward_stdout: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buffer_capacity: DEFAULT_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            query_cache_size: DEFAULT_CACHE_ENTRIES,
            hit_rate_window: DEFAULT_HIT_RATE_WINDOW,
            max_request_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            forward_stdout: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Self {
            host: env::var("LOG_ANALYTICS_HOST").unwrap_or(defaults.host),
            port: parse_env("LOG_ANALYTICS_PORT").unwrap_or(defaults.port),
            buffer_capacity: parse_env("LOG_ANALYTICS_BUFFER_CAPACITY")
                .unwrap_or(defaults.buffer_capacity),
            batch_size: parse_env("LOG_ANALYTICS_BATCH_SIZE").unwrap_or(defaults.batch_size),
            flush_interval: parse_env("LOG_ANALYTICS_FLUSH_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            query_cache_size: parse_env("LOG_ANALYTICS_QUERY_CACHE_SIZE")
                .unwrap_or(defaults.query_cache_size),
            hit_rate_window: parse_env("LOG_ANALYTICS_HIT_RATE_WINDOW")
                .unwrap_or(defaults.hit_rate_window),
            max_request_content_length: parse_env("LOG_ANALYTICS_MAX_CONTENT_LENGTH")
                .unwrap_or(defaults.max_request_content_length),
            forward_stdout: env::var("LOG_ANALYTICS_FORWARD_STDOUT")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(defaults.forward_stdout),
            log_level: env::var("LOG_ANALYTICS_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if IpAddr::from_str(&self.host).is_err() {
            return Err(ConfigError::Invalid(format!(
                "LOG_ANALYTICS_HOST '{}' is not an IP address",
                self.host
            )));
        }

        for (name, value) in [
            ("LOG_ANALYTICS_BUFFER_CAPACITY", self.buffer_capacity),
            ("LOG_ANALYTICS_BATCH_SIZE", self.batch_size),
            ("LOG_ANALYTICS_HIT_RATE_WINDOW", self.hit_rate_window),
            ("LOG_ANALYTICS_MAX_CONTENT_LENGTH", self.max_request_content_length),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "LOG_ANALYTICS_FLUSH_INTERVAL must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Address the HTTP server binds to. Only meaningful on a validated config.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        IpAddr::from_str(&self.host)
            .map(|ip| SocketAddr::new(ip, self.port))
            .map_err(|e| ConfigError::Invalid(format!("LOG_ANALYTICS_HOST: {e}")))
    }
}

/// Unset or unparseable values yield `None` so that the default applies.
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}
