// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Configuration for the MIDI bridge.
//!
//! Settings are read from a YAML or TOML file. The C ABI and the sample
//! client pick the file up from the `MIDIBRIDGE_CONFIG` environment variable.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MIDIBRIDGE_CONFIG";

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Client name registered with the OS MIDI service
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Hotplug poll period for backends without a native device watch
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum log level ("error", "warn", "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_client_name() -> String {
    "midibridge".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration file. `.toml` files are parsed as TOML,
    /// everything else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML configuration")
    }

    /// Serialize to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Load the file named by `MIDIBRIDGE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parsed `log_level`, falling back to INFO when unrecognized
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
