//! Supervisor configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration that supervises the compiled-in program table.

use crate::error::ConfigError;
use crate::program::{builtin_programs, ProgramSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Pause between loop iterations and between final reap attempts
    pub poll_interval_ms: u64,

    /// Programs to supervise; empty means the compiled-in table
    pub programs: Vec<ProgramSpec>,

    pub restart: RestartPolicy,

    /// Written once running, removed on a clean stop
    pub pid_file: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            programs: Vec::new(),
            restart: RestartPolicy::default(),
            pid_file: None,
        }
    }
}

impl SupervisorConfig {
    /// Configuration supervising exactly `programs`
    pub fn with_programs(programs: Vec<ProgramSpec>) -> Self {
        Self {
            programs,
            ..Self::default()
        }
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(index) = self
            .programs
            .iter()
            .position(|p| p.path.as_os_str().is_empty())
        {
            return Err(ConfigError::EmptyPath { index });
        }
        if let Some(backoff) = &self.restart.backoff {
            if !(backoff.multiplier >= 1.0) {
                return Err(ConfigError::InvalidMultiplier(backoff.multiplier));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The program table the registry is populated from
    pub fn effective_programs(&self) -> Vec<ProgramSpec> {
        if self.programs.is_empty() {
            builtin_programs()
        } else {
            self.programs.clone()
        }
    }
}

/// What happens after a watched program terminates
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Relaunch limit per program; `None` is unlimited
    pub max_restarts: Option<u32>,

    /// Delay schedule between relaunches; `None` relaunches immediately
    pub backoff: Option<BackoffConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
        }
    }
}
