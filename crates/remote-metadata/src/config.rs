// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for the remote metadata service.
//!
//! Values can be built from defaults, from the process environment, or from an
//! arbitrary iterator of key/value pairs so tests do not have to mutate the
//! real environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Workspace root holding the `downloadedMetadata` cache directory.
const ENV_WORKSPACE_DIR: &str = "METADATA_WORKSPACE_DIR";
/// Cadence of the per-source staleness check, in milliseconds.
const ENV_RERUN_INTERVAL_MS: &str = "METADATA_RERUN_INTERVAL_MS";
/// Idle time after which a parsed document leaves the memory cache.
const ENV_MEMORY_CACHE_TTL_SECS: &str = "METADATA_MEMORY_CACHE_TTL_SECS";
/// Maximum number of documents kept in memory.
const ENV_MEMORY_CACHE_CAPACITY: &str = "METADATA_MEMORY_CACHE_CAPACITY";
const ENV_CONNECT_TIMEOUT_SECS: &str = "METADATA_CONNECT_TIMEOUT_SECS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "METADATA_REQUEST_TIMEOUT_SECS";
/// Directory of `<name>.pem` bundles backing named trust stores.
const ENV_TRUSTSTORE_DIR: &str = "METADATA_TRUSTSTORE_DIR";

/// Default cadence of the background staleness check.
pub const DEFAULT_RERUN_INTERVAL: Duration = Duration::from_millis(1000);
/// Default idle TTL of the in-memory document cache.
pub const DEFAULT_MEMORY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Default bound on the number of cached documents.
pub const DEFAULT_MEMORY_CACHE_CAPACITY: u64 = 256;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default workspace root when none is configured.
pub const DEFAULT_WORKSPACE_DIR: &str = "data/workspace";

/// Configuration for the remote metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataServiceConfig {
    /// Root directory of the file workspace; downloads land in its `downloadedMetadata` child.
    pub workspace_dir: PathBuf,
    /// How often each source handler wakes up to check whether a refresh is due.
    pub rerun_interval: Duration,
    /// Idle time after which a document is evicted from the memory cache.
    pub memory_cache_ttl: Duration,
    /// Maximum number of documents held by the memory cache.
    pub memory_cache_capacity: u64,
    /// TCP/TLS connect timeout applied to metadata downloads.
    pub connect_timeout: Duration,
    /// Total request timeout applied to metadata downloads.
    pub request_timeout: Duration,
    /// Optional directory resolving named trust stores.
    pub truststore_dir: Option<PathBuf>,
}

impl Default for MetadataServiceConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            rerun_interval: DEFAULT_RERUN_INTERVAL,
            memory_cache_ttl: DEFAULT_MEMORY_CACHE_TTL,
            memory_cache_capacity: DEFAULT_MEMORY_CACHE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            truststore_dir: None,
        }
    }
}

impl MetadataServiceConfig {
    /// Create configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    ///
    /// Unparseable numeric values fall back to their defaults; the resulting
    /// configuration is validated before it is returned.
    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let defaults = Self::default();
        let workspace_dir = map
            .get(ENV_WORKSPACE_DIR)
            .and_then(|value| non_empty(value))
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let rerun_interval = parse_u64(&map, ENV_RERUN_INTERVAL_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.rerun_interval);
        let memory_cache_ttl = parse_u64(&map, ENV_MEMORY_CACHE_TTL_SECS)
            .map(Duration::from_secs)
            .unwrap_or(defaults.memory_cache_ttl);
        let memory_cache_capacity = parse_u64(&map, ENV_MEMORY_CACHE_CAPACITY)
            .unwrap_or(defaults.memory_cache_capacity);
        let connect_timeout = parse_u64(&map, ENV_CONNECT_TIMEOUT_SECS)
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);
        let request_timeout = parse_u64(&map, ENV_REQUEST_TIMEOUT_SECS)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let truststore_dir = map
            .get(ENV_TRUSTSTORE_DIR)
            .and_then(|value| non_empty(value))
            .map(PathBuf::from);

        let config = Self {
            workspace_dir,
            rerun_interval,
            memory_cache_ttl,
            memory_cache_capacity,
            connect_timeout,
            request_timeout,
            truststore_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "workspace directory cannot be empty".to_string(),
            ));
        }
        if self.rerun_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "rerun interval must be greater than 0".to_string(),
            ));
        }
        if self.memory_cache_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "memory cache TTL must be greater than 0".to_string(),
            ));
        }
        if self.memory_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "memory cache capacity must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "network timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u64(map: &HashMap<String, String>, key: &str) -> Option<u64> {
    map.get(key).and_then(|value| value.trim().parse::<u64>().ok())
}
