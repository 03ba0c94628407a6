//! Transport device contracts.
//!
//! The endpoint layer never performs USB or HID I/O itself. It drives devices
//! through the traits in this module; concrete implementations live with the
//! platform backends. `synthetic` provides in-memory devices for tests and
//! the demo binary.
//!
//! # Delivery contract
//!
//! Raw frames are handed to core-provided callbacks on a thread owned by the
//! device. `stream_off` / `stop_capture` must not return while a callback is
//! still executing, and must drop the callbacks they were given.

pub mod hid;
pub mod synthetic;
pub mod uvc;

pub use hid::{HidDataCallback, HidDevice, HidSensor, IioProfile};
pub use synthetic::{DeviceEvent, SyntheticHidDevice, SyntheticUvcDevice};
pub use uvc::{ExtensionUnit, RawFrameCallback, UvcDevice};

/// Device power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Fully powered.
    D0,
    /// Suspended.
    D3,
}
