use anyhow::Result;

/// Sensor exposed by a HID device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HidSensor {
    pub name: String,
    /// Index of the sensor on the device.
    pub iio: u32,
}

/// Sampling configuration for one sensor. A frequency of 0 keeps the device default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IioProfile {
    pub iio: u32,
    pub frequency: u32,
}

/// Receives one sensor sample on the device's delivery thread.
pub type HidDataCallback = Box<dyn FnMut(&HidSensor, &[u8]) + Send>;

/// Human-interface-device transport (motion sensors).
pub trait HidDevice: Send + Sync {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn sensors(&self) -> Result<Vec<HidSensor>>;

    fn start_capture(&self, profiles: &[IioProfile], callback: HidDataCallback) -> Result<()>;

    /// Stop delivery. Returns only once the callback is no longer running.
    fn stop_capture(&self) -> Result<()>;
}
