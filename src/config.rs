use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use teslabms_lib::pack::PackSettings;

/// Optional overrides of the pack settings, read from YAML.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackConfig {
    #[serde(default, with = "humantime_serde")]
    settle_delay: Option<Duration>,
    max_reset_attempts: Option<u32>,
    max_address_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    command_pause: Option<Duration>,
    balance_tolerance: Option<f32>,
    balance_monitor_iterations: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    balance_monitor_interval: Option<Duration>,
}

impl PackConfig {
    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    pub fn settle_delay(&self) -> Option<Duration> {
        self.settle_delay
    }

    pub fn apply(&self, settings: &mut PackSettings) {
        if let Some(v) = self.max_reset_attempts {
            settings.max_reset_attempts = v;
        }
        if let Some(v) = self.max_address_attempts {
            settings.max_address_attempts = v;
        }
        if let Some(v) = self.command_pause {
            settings.command_pause = v;
        }
        if let Some(v) = self.balance_tolerance {
            settings.balance_tolerance = v;
        }
        if let Some(v) = self.balance_monitor_iterations {
            settings.balance_monitor_iterations = v;
        }
        if let Some(v) = self.balance_monitor_interval {
            settings.balance_monitor_interval = v;
        }
    }
}
