use anyhow::Result;

use crate::option::{OptionId, OptionRange};
use crate::stream::NativeStreamProfile;

use super::PowerState;

/// Receives one raw native frame on the device's delivery thread.
pub type RawFrameCallback = Box<dyn FnMut(&NativeStreamProfile, &[u8]) + Send>;

/// Vendor extension unit descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExtensionUnit {
    pub subdevice: u8,
    pub unit: u8,
    pub node: u8,
    pub id: [u8; 16],
}

/// Video-class transport device.
pub trait UvcDevice: Send + Sync {
    /// Enumerate native stream profiles. May require the device powered.
    fn profiles(&self) -> Result<Vec<NativeStreamProfile>>;

    fn set_power_state(&self, state: PowerState) -> Result<()>;

    fn power_state(&self) -> PowerState;

    /// Initialise an extension unit after power-up.
    fn init_xu(&self, xu: &ExtensionUnit) -> Result<()>;

    /// Negotiate and commit a native profile for later streaming.
    fn probe_and_commit(&self, profile: &NativeStreamProfile) -> Result<()>;

    /// Begin asynchronous delivery for committed profiles.
    fn stream_on(&self, streams: Vec<(NativeStreamProfile, RawFrameCallback)>) -> Result<()>;

    /// Stop delivery. Returns only once no callback is running.
    fn stream_off(&self) -> Result<()>;

    /// Release a committed profile.
    fn close(&self, profile: &NativeStreamProfile) -> Result<()>;

    /// Processing-unit controls.
    fn get_pu(&self, id: OptionId) -> Result<i32>;

    fn set_pu(&self, id: OptionId, value: i32) -> Result<()>;

    fn get_pu_range(&self, id: OptionId) -> Result<OptionRange>;
}
