//! Configuration for the watch orchestration core.
//!
//! Provides layered configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Optional TOML config file
//! 3. Environment variables (highest priority)

mod watch;
pub use watch::*;

//---
use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct WatchSettings {
    /// Online-state classification parameters
    #[serde(default)]
    pub online: OnlineStateConfig,
    /// Controller mailbox capacities
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl WatchSettings {
    /// Load configuration with priority:
    /// 1. Optional TOML file
    /// 2. `WATCHSYNC__`-prefixed environment variables
    ///
    /// # Arguments
    /// * `path` - Optional path to a TOML configuration file
    ///
    /// # Returns
    /// Merged and validated configuration
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("WATCHSYNC")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: WatchSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.online.max_watch_stream_failures == 0 {
            return Err(ConfigError::Message(
                "online.max_watch_stream_failures must be at least 1".to_string(),
            )
            .into());
        }
        if self.channel.command_buffer_size == 0 {
            return Err(ConfigError::Message(
                "channel.command_buffer_size must be greater than zero".to_string(),
            )
            .into());
        }
        if self.channel.signal_buffer_size == 0 {
            return Err(ConfigError::Message(
                "channel.signal_buffer_size must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod config_test;
