use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::frame::{DEFAULT_FRAME_POOL_CAPACITY, DEFAULT_MAX_PUBLISH_LIST_SIZE};
use crate::stream::StreamProfile;
use crate::timestamp::{RollingCounterLayout, DEFAULT_TICKS_PER_UNIT};

const CONFIG_ENV: &str = "SENSOR_ENDPOINT_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    max_publish_list_size: Option<u32>,
    frame_pool_capacity: Option<usize>,
    rolling_timestamp: Option<RollingTimestampConfigFile>,
    hid_sampling_frequency: Option<u32>,
    requests: Option<Vec<StreamProfile>>,
}

#[derive(Debug, Deserialize, Default)]
struct RollingTimestampConfigFile {
    counter_offset: Option<usize>,
    ticks_per_unit: Option<i64>,
}

/// Endpoint tuning shared by video and HID endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub max_publish_list_size: u32,
    pub frame_pool_capacity: usize,
    pub rolling_timestamp: RollingCounterLayout,
    /// Requested HID sampling rate in Hz; 0 keeps the device default.
    pub hid_sampling_frequency: u32,
    /// Streams to open instead of the endpoint's principal requests.
    pub requests: Option<Vec<StreamProfile>>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_publish_list_size: DEFAULT_MAX_PUBLISH_LIST_SIZE,
            frame_pool_capacity: DEFAULT_FRAME_POOL_CAPACITY,
            rolling_timestamp: RollingCounterLayout::default(),
            hid_sampling_frequency: 0,
            requests: None,
        }
    }
}

impl EndpointConfig {
    /// Load from `SENSOR_ENDPOINT_CONFIG` if set, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path, without environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EndpointConfigFile) -> Self {
        let rolling = file.rolling_timestamp.unwrap_or_default();
        Self {
            max_publish_list_size: file
                .max_publish_list_size
                .unwrap_or(DEFAULT_MAX_PUBLISH_LIST_SIZE),
            frame_pool_capacity: file
                .frame_pool_capacity
                .unwrap_or(DEFAULT_FRAME_POOL_CAPACITY),
            rolling_timestamp: RollingCounterLayout {
                counter_offset: rolling.counter_offset.unwrap_or(0),
                ticks_per_unit: rolling.ticks_per_unit.unwrap_or(DEFAULT_TICKS_PER_UNIT),
            },
            hid_sampling_frequency: file.hid_sampling_frequency.unwrap_or(0),
            requests: file.requests,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_number("SENSOR_ENDPOINT_MAX_PUBLISH")? {
            self.max_publish_list_size = value;
        }
        if let Some(value) = env_number("SENSOR_ENDPOINT_POOL_CAPACITY")? {
            self.frame_pool_capacity = value;
        }
        if let Some(value) = env_number("SENSOR_ENDPOINT_TICKS_PER_UNIT")? {
            self.rolling_timestamp.ticks_per_unit = value;
        }
        if let Some(value) = env_number("SENSOR_ENDPOINT_HID_FREQUENCY")? {
            self.hid_sampling_frequency = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_publish_list_size == 0 {
            return Err(anyhow!("max_publish_list_size must be greater than zero"));
        }
        if self.frame_pool_capacity == 0 {
            return Err(anyhow!("frame_pool_capacity must be greater than zero"));
        }
        self.rolling_timestamp.validate()?;
        if let Some(requests) = &self.requests {
            if requests.is_empty() {
                return Err(anyhow!("requests must not be empty when present"));
            }
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", name)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<EndpointConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
