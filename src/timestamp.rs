//! Frame validation and timestamp reconstruction.
//!
//! A timestamp reader is created per configured stream when streaming starts
//! and discarded when it stops. It is owned by that stream's delivery
//! callback, so it needs no internal synchronisation.

use anyhow::{bail, Result};

use crate::stream::RequestMapping;

/// Hardware counter ticks per output timestamp unit.
pub const DEFAULT_TICKS_PER_UNIT: i64 = 100_000;

/// Largest accepted counter offset. No supported frame comes close.
pub const MAX_COUNTER_OFFSET: usize = 64 << 20;

const COUNTER_WIDTH: usize = 4;

pub trait FrameTimestampReader: Send {
    /// False if the frame should be dropped without timestamping.
    fn validate_frame(&self, mode: &RequestMapping, frame: &[u8]) -> bool;

    fn frame_timestamp(&mut self, mode: &RequestMapping, frame: &[u8]) -> f64;

    fn frame_counter(&mut self, mode: &RequestMapping, frame: &[u8]) -> u64;
}

/// Where the rolling counter sits in a frame and how to scale it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RollingCounterLayout {
    /// Byte offset of the little-endian 32-bit counter.
    pub counter_offset: usize,
    pub ticks_per_unit: i64,
}

impl Default for RollingCounterLayout {
    fn default() -> Self {
        Self {
            counter_offset: 0,
            ticks_per_unit: DEFAULT_TICKS_PER_UNIT,
        }
    }
}

impl RollingCounterLayout {
    pub fn validate(&self) -> Result<()> {
        if self.ticks_per_unit <= 0 {
            bail!("rolling_timestamp.ticks_per_unit must be greater than zero");
        }
        if self.counter_offset > MAX_COUNTER_OFFSET {
            bail!(
                "rolling_timestamp.counter_offset {} exceeds {}",
                self.counter_offset,
                MAX_COUNTER_OFFSET
            );
        }
        Ok(())
    }
}

/// Reader for devices that embed a wrapping 32-bit counter in each frame.
///
/// Only deltas between consecutive counters are accumulated, so rollover is
/// tolerated indefinitely.
#[derive(Debug)]
pub struct RollingTimestampReader {
    layout: RollingCounterLayout,
    started: bool,
    total: i64,
    last_timestamp: i32,
    counter: u64,
}

impl RollingTimestampReader {
    /// A layout that fails [`RollingCounterLayout::validate`] is still usable:
    /// a non-positive scale falls back to raw ticks and an out-of-range
    /// offset reads no counter.
    pub fn new(mut layout: RollingCounterLayout) -> Self {
        if let Err(err) = layout.validate() {
            log::warn!("RollingTimestampReader: {}", err);
        }
        if layout.ticks_per_unit <= 0 {
            layout.ticks_per_unit = 1;
        }
        Self {
            layout,
            started: false,
            total: 0,
            last_timestamp: 0,
            counter: 0,
        }
    }

    fn read_counter(&self, frame: &[u8]) -> Option<i32> {
        let start = self.layout.counter_offset;
        let bytes = frame.get(start..start.checked_add(COUNTER_WIDTH)?)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl Default for RollingTimestampReader {
    fn default() -> Self {
        Self::new(RollingCounterLayout::default())
    }
}

impl FrameTimestampReader for RollingTimestampReader {
    fn validate_frame(&self, mode: &RequestMapping, frame: &[u8]) -> bool {
        let image_size = mode.image_size();
        let Some(image) = frame.get(..image_size) else {
            return false;
        };
        // Some sensors emit all-zero frames shortly after stream start.
        image.iter().any(|&b| b != 0)
    }

    fn frame_timestamp(&mut self, _mode: &RequestMapping, frame: &[u8]) -> f64 {
        if let Some(rolling) = self.read_counter(frame) {
            if !self.started {
                self.last_timestamp = rolling;
                self.started = true;
            }
            // Modular 32-bit difference, reinterpreted as signed.
            let delta = (rolling as u32).wrapping_sub(self.last_timestamp as u32) as i32;
            self.last_timestamp = rolling;
            self.total += i64::from(delta);
        }
        (self.total / self.layout.ticks_per_unit) as f64
    }

    fn frame_counter(&mut self, _mode: &RequestMapping, _frame: &[u8]) -> u64 {
        self.counter += 1;
        self.counter
    }
}
