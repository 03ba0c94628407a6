//! Option objects registered on endpoints.
//!
//! The endpoint layer only registers and looks options up; their semantics
//! belong to whoever implements [`EndpointOption`].

use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};

/// Option identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionId {
    BacklightCompensation,
    Brightness,
    Contrast,
    Exposure,
    Gain,
    Gamma,
    Hue,
    Saturation,
    Sharpness,
    WhiteBalance,
    EnableAutoExposure,
    EnableAutoWhiteBalance,
    PowerLineFrequency,
    LaserPower,
    FramesQueueSize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

impl OptionRange {
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Get/set-capable option value.
pub trait EndpointOption: Send + Sync {
    fn query(&self) -> Result<f32>;

    fn set(&self, value: f32) -> Result<()>;

    fn range(&self) -> Result<OptionRange>;

    fn is_enabled(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        ""
    }
}

/// In-memory option holding a value within a fixed range.
pub struct ValueOption {
    range: OptionRange,
    value: Mutex<f32>,
    description: String,
}

impl ValueOption {
    pub fn new(range: OptionRange, description: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(range.default),
            range,
            description: description.into(),
        }
    }
}

impl EndpointOption for ValueOption {
    fn query(&self) -> Result<f32> {
        Ok(*self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set(&self, value: f32) -> Result<()> {
        if !self.range.contains(value) {
            return Err(anyhow!(
                "value {} outside range [{}, {}]",
                value,
                self.range.min,
                self.range.max
            ));
        }
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(self.range)
    }

    fn description(&self) -> &str {
        &self.description
    }
}
