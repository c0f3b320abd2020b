//! Configuration Management
//!
//! Handles persistent configuration storage for cloudshare.

use crate::cache::{validate_name, CacheStore};
use crate::collect::{CollectOptions, DEFAULT_CONCURRENCY};
use crate::rebalance::Strategy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4566";
pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_SHARE_PREFIX: &str = "dns";

/// User configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Credentials profile
    #[serde(default)]
    pub profile: Option<String>,
    /// Region for global kinds
    #[serde(default)]
    pub home_region: Option<String>,
    /// Base URL of the RPC backend
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cache root (defaults to the system temp directory)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// Maximum members per share
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub share_prefix: Option<String>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudshare").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Read a config file; missing or invalid files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get effective profile (CLI > config > AWS_PROFILE > default)
    pub fn effective_profile(&self) -> Result<String> {
        let profile = self
            .profile
            .clone()
            .or_else(|| env_var("AWS_PROFILE"))
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        validate_name(&profile).context("Invalid profile name")?;
        Ok(profile)
    }

    /// Get effective home region (CLI > config > AWS_DEFAULT_REGION > us-east-1)
    pub fn effective_region(&self) -> String {
        self.home_region
            .clone()
            .or_else(|| env_var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_CAPACITY)
    }

    pub fn effective_strategy(&self) -> Strategy {
        self.strategy.unwrap_or_default()
    }

    pub fn effective_share_prefix(&self) -> String {
        self.share_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_SHARE_PREFIX.to_string())
    }

    pub fn cache_store(&self) -> CacheStore {
        match &self.cache_dir {
            Some(dir) => CacheStore::new(dir),
            None => CacheStore::in_temp_dir(),
        }
    }

    pub fn collect_options(&self) -> Result<CollectOptions> {
        let mut options = CollectOptions::new(&self.effective_profile()?, &self.effective_region());
        options.concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        options.call_timeout = self.call_timeout_secs.map(Duration::from_secs);
        Ok(options)
    }

    /// Overlay command-line values on top of the file's
    pub fn merge(mut self, overrides: Config) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if overrides.$field.is_some() {
                    self.$field = overrides.$field;
                })*
            };
        }
        overlay!(
            profile,
            home_region,
            endpoint,
            cache_dir,
            concurrency,
            call_timeout_secs,
            capacity,
            strategy,
            share_prefix
        );
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
