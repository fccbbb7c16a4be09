// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::bulk::ElasticsearchConfig;
use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_BULK_CHUNK_SIZE, DEFAULT_ES_TIMEOUT_SECS, DEFAULT_ES_URL,
    DEFAULT_HOST, DEFAULT_INDEX, DEFAULT_LOG_LEVEL, DEFAULT_MAX_DELAY_SECS, DEFAULT_PORT,
    DEFAULT_SHUTDOWN_GRACE_SECS,
};
use crate::errors::ConfigError;
use crate::parser::{OpenTsdbParser, TimeUnit};
use crate::sender::FlushPolicy;

/// Relay configuration, read from `INJECTOR_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorConfig {
    /// Listen address
    pub host: String,
    /// Listen port, 0 picks an ephemeral one
    pub port: u16,
    /// Target index for every document
    pub index: String,
    /// Pending documents above which a flush is triggered
    pub buffer_size: usize,
    /// Time since the last flush above which a flush is triggered
    pub max_delay: Duration,
    /// Unit of the timestamps sent by producers
    pub time_unit: TimeUnit,
    /// Whether lines must start with `put`
    pub require_prefix: bool,
    pub es_url: String,
    pub es_timeout: Duration,
    /// Max documents per bulk request
    pub es_chunk_size: usize,
    pub es_username: Option<String>,
    pub es_password: Option<String>,
    /// Emit `_type` in bulk action lines
    pub es_mapping_types: bool,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Max concurrent connections, unbounded when unset
    pub max_connections: Option<usize>,
    /// How long open connections may keep sending after shutdown starts
    pub shutdown_grace: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            index: DEFAULT_INDEX.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            time_unit: TimeUnit::default(),
            require_prefix: true,
            es_url: DEFAULT_ES_URL.to_string(),
            es_timeout: Duration::from_secs(DEFAULT_ES_TIMEOUT_SECS),
            es_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            es_username: None,
            es_password: None,
            es_mapping_types: true,
            https_proxy: None,
            max_connections: None,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl InjectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable numbers and
    /// booleans fall back to their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|val| val.trim().parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|val| match val.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    _ => default,
                })
                .unwrap_or(default)
        };

        let time_unit = match lookup("INJECTOR_TIME_UNIT") {
            Some(val) => val.parse::<TimeUnit>()?,
            None => defaults.time_unit,
        };

        let config = Self {
            host: lookup("INJECTOR_HOST").unwrap_or(defaults.host),
            port: lookup("INJECTOR_PORT")
                .and_then(|port| port.trim().parse::<u16>().ok())
                .unwrap_or(defaults.port),
            index: lookup("INJECTOR_INDEX").unwrap_or(defaults.index),
            buffer_size: parsed("INJECTOR_BUFFER_SIZE").map_or(defaults.buffer_size, |n| {
                usize::try_from(n).unwrap_or(usize::MAX)
            }),
            max_delay: parsed("INJECTOR_MAX_DELAY")
                .map_or(defaults.max_delay, Duration::from_secs),
            time_unit,
            require_prefix: flag("INJECTOR_REQUIRE_PREFIX", defaults.require_prefix),
            es_url: lookup("INJECTOR_ES_URL").unwrap_or(defaults.es_url),
            es_timeout: parsed("INJECTOR_ES_TIMEOUT")
                .map_or(defaults.es_timeout, Duration::from_secs),
            es_chunk_size: parsed("INJECTOR_ES_CHUNK_SIZE")
                .map_or(defaults.es_chunk_size, |n| usize::try_from(n).unwrap_or(usize::MAX)),
            es_username: lookup("INJECTOR_ES_USERNAME"),
            es_password: lookup("INJECTOR_ES_PASSWORD"),
            es_mapping_types: flag("INJECTOR_ES_MAPPING_TYPES", defaults.es_mapping_types),
            https_proxy: lookup("INJECTOR_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
            max_connections: parsed("INJECTOR_MAX_CONNECTIONS")
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
            shutdown_grace: parsed("INJECTOR_SHUTDOWN_GRACE")
                .map_or(defaults.shutdown_grace, Duration::from_secs),
            log_level: lookup("INJECTOR_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "INJECTOR_HOST cannot be empty".to_string(),
            ));
        }

        if self.index.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "INJECTOR_INDEX cannot be empty".to_string(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        if self.es_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "bulk chunk size must be greater than 0".to_string(),
            ));
        }

        if self.es_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "INJECTOR_ES_URL cannot be empty".to_string(),
            ));
        }

        match self.max_connections {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "max connections must be greater than 0".to_string(),
                ));
            }
            Some(max) if max > Semaphore::MAX_PERMITS => {
                return Err(ConfigError::Invalid(format!(
                    "max connections must be at most {}",
                    Semaphore::MAX_PERMITS
                )));
            }
            _ => {}
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            buffer_size: self.buffer_size,
            max_delay: self.max_delay,
        }
    }

    #[must_use]
    pub fn parser(&self) -> OpenTsdbParser {
        if self.require_prefix {
            OpenTsdbParser::put(self.time_unit)
        } else {
            OpenTsdbParser::new(self.time_unit)
        }
    }

    #[must_use]
    pub fn elasticsearch(&self) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: self.es_url.clone(),
            timeout: self.es_timeout,
            chunk_size: self.es_chunk_size,
            username: self.es_username.clone(),
            password: self.es_password.clone(),
            mapping_types: self.es_mapping_types,
            https_proxy: self.https_proxy.clone(),
        }
    }
}
