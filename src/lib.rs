//! Sensor endpoint layer for depth-camera devices.
//!
//! This crate sits between raw transport devices (video-class and HID) and
//! applications consuming frames. It owns the per-endpoint lifecycle
//! (open, stream, stop, close), resolves application stream requests against
//! what the hardware can produce, reconstructs frame timestamps from embedded
//! rolling counters, and reference-counts device power.
//!
//! # Module Structure
//!
//! - `endpoint`: the `Endpoint` contract, `UvcEndpoint` and `HidEndpoint`
//! - `stream`: stream profiles, native pixel formats, request resolution
//! - `frame`: frame buffers, the bounded frame pool, flush
//! - `timestamp`: frame validation and rolling-counter timestamps
//! - `transport`: device traits and synthetic in-memory devices
//! - `option`, `registry`: option and camera-info registries
//! - `config`: file and environment configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensor_endpoint::transport::SyntheticUvcDevice;
//! use sensor_endpoint::{
//!     fourcc, pf_yuy2, Endpoint, EndpointConfig, Frame, NativeStreamProfile, UvcEndpoint,
//! };
//!
//! # fn main() -> sensor_endpoint::Result<()> {
//! let device = Arc::new(
//!     SyntheticUvcDevice::new(vec![NativeStreamProfile::new(640, 480, 30, fourcc(b"YUY2"))])
//!         .with_auto_delivery(),
//! );
//! let endpoint = UvcEndpoint::new(device, &EndpointConfig::default());
//! endpoint.register_pixel_format(pf_yuy2());
//!
//! let requests = endpoint.principal_requests()?;
//! endpoint.open(&requests)?;
//! endpoint.start_streaming(Box::new(|frame: Frame| println!("{:?}", frame)))?;
//! endpoint.stop_streaming()?;
//! endpoint.close()?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod lazy;
pub mod option;
pub mod registry;
pub mod stream;
pub mod timestamp;
pub mod transport;

pub use config::EndpointConfig;
pub use endpoint::{
    Endpoint, EndpointCore, FrameCallback, FrameDispatcher, HidEndpoint, PowerGate,
    SensorEndpoint, UvcEndpoint, UvcPuOption,
};
pub use error::{EndpointError, Result};
pub use frame::{Frame, FrameAdditionalData, FrameArchive};
pub use option::{EndpointOption, OptionId, OptionRange, ValueOption};
pub use stream::{
    fourcc, fourcc_to_string, pf_accel_axes, pf_gyro_axes, pf_y8, pf_yuy2, pf_z16, Format,
    NativePixelFormat, NativeStreamProfile, PixelFormatUnpacker, RequestMapping, StreamKind,
    StreamProfile,
};
pub use timestamp::{FrameTimestampReader, RollingCounterLayout, RollingTimestampReader};

/// Lock a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Camera-info fields an endpoint may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraInfo {
    Name,
    SerialNumber,
    FirmwareVersion,
    Location,
    DebugOpCode,
    AdvancedMode,
    ProductId,
    CameraLocked,
    UsbTypeDescriptor,
    PhysicalPort,
}

/// Rigid transform of an endpoint relative to the device origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Row-major rotation matrix.
    pub orientation: [[f32; 3]; 3],
    /// Translation in meters.
    pub position: [f32; 3],
}

impl Default for Pose {
    /// Identity transform.
    fn default() -> Self {
        Self {
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            position: [0.0; 3],
        }
    }
}
