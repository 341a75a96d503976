//! Simulation configuration
//!
//! Loaded from TOML. Every section falls back to its defaults, so a file only
//! needs the keys it changes:
//!
//! ```toml
//! [device]
//! blocks = 4096
//! simulate_latency = false
//!
//! [workload]
//! seed = 42
//! ```

use crate::device::{Latency, NoLatency, SleepLatency};
use crate::error::{FreespaceError, Result};
use crate::workload::WorkloadSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub device: DeviceConfig,
    pub workload: WorkloadConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub blocks: usize,
    /// Fraction of blocks occupied when a fresh pattern is seeded
    pub initial_fill: f64,
    pub simulate_latency: bool,
    pub read_latency_ms: u64,
    pub write_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Repetitions for the list strategies
    pub runs: usize,
    /// Repetitions for the bitmap strategy (its scans are slow under latency)
    pub bitmap_runs: usize,
    pub allocations: usize,
    pub releases: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub pattern_file: PathBuf,
    pub results_file: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            blocks: 1024,
            initial_fill: 0.70,
            simulate_latency: true,
            read_latency_ms: 1,
            write_latency_ms: 1,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            runs: 5,
            bitmap_runs: 1,
            allocations: 50,
            releases: 30,
            min_size: 1,
            max_size: 32,
            seed: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pattern_file: PathBuf::from("data/disk.txt"),
            results_file: PathBuf::from("data/results.json"),
        }
    }
}

impl SimConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.blocks == 0 {
            return Err(FreespaceError::InvalidConfig(
                "device.blocks must be positive".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.device.initial_fill) {
            return Err(FreespaceError::InvalidConfig(format!(
                "device.initial_fill must be within 0.0..=1.0, got {}",
                self.device.initial_fill
            )));
        }

        let workload = &self.workload;
        if workload.min_size == 0 || workload.min_size > workload.max_size {
            return Err(FreespaceError::InvalidConfig(format!(
                "workload sizes must satisfy 1 <= min_size <= max_size, got {}..={}",
                workload.min_size, workload.max_size
            )));
        }

        if workload.runs == 0 || workload.bitmap_runs == 0 {
            return Err(FreespaceError::InvalidConfig(
                "workload.runs and workload.bitmap_runs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Latency model for devices built from this configuration
    pub fn latency(&self) -> Box<dyn Latency> {
        if self.device.simulate_latency {
            Box::new(SleepLatency::from_millis(
                self.device.read_latency_ms,
                self.device.write_latency_ms,
            ))
        } else {
            Box::new(NoLatency)
        }
    }

    pub fn workload(&self) -> WorkloadSpec {
        WorkloadSpec {
            allocations: self.workload.allocations,
            releases: self.workload.releases,
            min_size: self.workload.min_size,
            max_size: self.workload.max_size,
        }
    }

    /// Configuration for fast runs: no simulated latency
    pub fn without_latency(mut self) -> Self {
        self.device.simulate_latency = false;
        self
    }
}
