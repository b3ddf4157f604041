//! Engine configuration.
//!
//! Every field has a named default; partial JSON is filled from them and then
//! validated. Invalid input is rejected rather than silently replaced.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 200;
pub const DEFAULT_REPEAT: bool = true;
pub const DEFAULT_RESAMPLE: bool = true;

const MAX_TICK_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logical timer polling interval.
    pub tick_interval_ms: u64,
    /// Repeat (loop-region playback) enabled when a session starts.
    pub repeat: bool,
    /// Resample decoded parts to the output rate at decode time.
    pub resample: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            repeat: DEFAULT_REPEAT,
            resample: DEFAULT_RESAMPLE,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            return Err(ConfigError::TickInterval(self.tick_interval_ms));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
