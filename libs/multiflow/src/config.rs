// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Device table configuration via `multiflow.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, TickRate};
use crate::error::{MultiflowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Number of devices, ids `0..count`.
    pub count: usize,
    /// Prefix of the device paths, `/dev/<name><id>`.
    pub name: String,
    /// Devices that start disabled.
    pub disabled: Vec<DeviceId>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            count: 128,
            name: "multiflow".to_string(),
            disabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Byte capacity of every flow.
    pub capacity: usize,
    /// Largest payload a single write may carry.
    pub max_segment_size: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_segment_size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_rate_hz: u64,
    pub default_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 250,
            default_timeout_secs: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Deferred writer threads; unset means available parallelism.
    pub threads: Option<usize>,
}

/// Full configuration of a device table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiflowConfig {
    pub devices: DevicesConfig,
    pub flow: FlowConfig,
    pub timing: TimingConfig,
    pub workers: WorkersConfig,
}

impl MultiflowConfig {
    /// Conventional configuration file name.
    pub const FILE_NAME: &'static str = "multiflow.toml";

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MultiflowError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`. Fails if the file is missing,
    /// unparseable, or invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MultiflowError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            MultiflowError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded multiflow config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from `path`, returning defaults if the file is
    /// missing or unusable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.count == 0 {
            return Err(invalid("devices.count must be greater than zero"));
        }
        if self.devices.name.is_empty() {
            return Err(invalid("devices.name must not be empty"));
        }
        if let Some(id) = self.devices.disabled.iter().find(|id| **id >= self.devices.count) {
            return Err(MultiflowError::Configuration(format!(
                "devices.disabled contains {} but only {} devices exist",
                id, self.devices.count
            )));
        }
        if self.flow.capacity == 0 {
            return Err(invalid("flow.capacity must be greater than zero"));
        }
        if self.flow.max_segment_size == 0 {
            return Err(invalid("flow.max_segment_size must be greater than zero"));
        }
        if self.timing.tick_rate_hz == 0 {
            return Err(invalid("timing.tick_rate_hz must be greater than zero"));
        }
        if self.timing.default_timeout_secs == 0 {
            return Err(invalid("timing.default_timeout_secs must be greater than zero"));
        }
        if self.default_timeout_ticks().is_none() {
            return Err(invalid("timing.default_timeout_secs overflows the tick counter"));
        }
        if self.workers.threads == Some(0) {
            return Err(invalid("workers.threads must be greater than zero"));
        }
        Ok(())
    }

    pub fn tick_rate(&self) -> TickRate {
        TickRate::new(self.timing.tick_rate_hz)
    }

    pub fn default_timeout_ticks(&self) -> Option<u64> {
        self.tick_rate()
            .ticks_for_secs(self.timing.default_timeout_secs)
    }

    pub fn worker_threads(&self) -> usize {
        self.workers.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

fn invalid(message: &str) -> MultiflowError {
    MultiflowError::Configuration(message.to_string())
}
