//! Subscription engine configuration

use crate::error::{Error, Result};
use crate::types::VideoDimension;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Subscription engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay before a track that left the screen is unsubscribed (ms)
    pub debounce_time_ms: u64,
    /// Dimension requested when a caller has no layout information yet
    pub default_dimension: VideoDimension,
    pub logging: LoggingConfig,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            debounce_time_ms: 2000,
            default_dimension: VideoDimension::new(1280, 720),
            logging: LoggingConfig::default(),
        }
    }
}

impl SubscriptionConfig {
    /// Load configuration from an optional file, overridden by environment
    /// variables (`CALLKIT_DEBOUNCE_TIME_MS`, `CALLKIT_LOGGING__LEVEL`, ...)
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CALLKIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_dimension.area() == 0 {
            return Err(Error::InvalidInput(format!(
                "default_dimension must not be empty, got {}",
                self.default_dimension
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn debounce_time(&self) -> Duration {
        Duration::from_millis(self.debounce_time_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}
