//! Serializable engine configuration.
//!
//! A [`RatelabConfig`] is usually loaded from a TOML file and built
//! into a [`MarketData`] engine: one `[[source]]` block per venue,
//! `[cache]` for the partition store root, `[http]` for transport
//! tuning. Venue credentials are optional; endpoints that need signing
//! fail with an auth error when they are missing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::PartitionCache;
use crate::engine::MarketData;
use crate::source::{
    ApiCredentials, BinanceSource, BybitSource, ExchangeSource, OkxSource, RestClient,
};

/// Errors from loading or building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Read(String),

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("serialize config: {0}")]
    Serialize(String),

    #[error("unknown source '{0}' (expected binance, bybit, or okx)")]
    UnknownSource(String),
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatelabConfig {
    pub cache: CacheSection,

    #[serde(default)]
    pub http: HttpSection,

    /// One block per venue, in the order queries will report columns.
    #[serde(default = "default_sources", rename = "source")]
    pub sources: Vec<SourceSection>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    /// Directory the partition files live under.
    pub root: PathBuf,
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSection {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Retries per request on transport errors.
    pub max_retries: u32,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// One `[[source]]` block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSection {
    /// Venue name: binance, bybit, or okx.
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
}

impl SourceSection {
    /// Credentials when both halves are configured.
    fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some(ApiCredentials {
                key: key.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_sources() -> Vec<SourceSection> {
    ["binance", "bybit", "okx"]
        .iter()
        .map(|name| SourceSection {
            name: (*name).to_string(),
            enabled: true,
            api_key: None,
            api_secret: None,
        })
        .collect()
}

impl RatelabConfig {
    /// All three venues enabled, no credentials.
    pub fn default_venues(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheSection {
                root: cache_root.into(),
            },
            http: HttpSection::default(),
            sources: default_sources(),
        }
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Build the engine: one adapter per enabled source over a shared
    /// transport configuration, backed by the configured cache root.
    pub fn build(&self) -> Result<MarketData, ConfigError> {
        let mut sources: Vec<Box<dyn ExchangeSource>> = Vec::new();
        for section in &self.sources {
            if !section.enabled {
                continue;
            }
            let http = RestClient::new(self.http.timeout_secs, self.http.max_retries);
            let source: Box<dyn ExchangeSource> = match section.name.to_lowercase().as_str() {
                "binance" => Box::new(BinanceSource::new(http, section.credentials())),
                "bybit" => Box::new(BybitSource::new(http, section.credentials())),
                "okx" => Box::new(OkxSource::new(http)),
                other => return Err(ConfigError::UnknownSource(other.to_string())),
            };
            sources.push(source);
        }
        Ok(MarketData::new(
            sources,
            PartitionCache::new(&self.cache.root),
        ))
    }
}
