//! Sensor endpoints.
//!
//! An endpoint is one logical sensing interface of a device: a video stream
//! family ([`UvcEndpoint`]) or a motion-sensor group ([`HidEndpoint`]). Both
//! honour the [`Endpoint`] contract:
//!
//! ```text
//! closed --open()--> opened --start_streaming()--> streaming
//!   ^                  |  ^                            |
//!   +-----close()------+  +------stop_streaming()------+
//! ```
//!
//! `open` while opened, and `close`/`start_streaming` while streaming, fail
//! with [`EndpointError::Precondition`]. Transitions are serialised by a
//! per-endpoint configuration lock; the state flags themselves are atomics and
//! may be read from any thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::frame::{Frame, FrameAdditionalData, FrameArchive};
use crate::lazy::Lazy;
use crate::option::{EndpointOption, OptionId};
use crate::registry::Registry;
use crate::stream::{
    resolve_requests, NativePixelFormat, NativeStreamProfile, RequestMapping, StreamProfile,
};
use crate::transport::{HidDevice, UvcDevice};
use crate::{lock, CameraInfo, Pose};

pub mod hid;
pub mod video;

pub use hid::{sensor_stream_format, HidEndpoint, HID_SENSOR_STREAMS};
pub use video::{PowerGate, UvcEndpoint, UvcPuOption};

/// Frame delivery target. Ownership of each frame moves into the callback.
pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;

pub(crate) fn system_time_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

// ----------------------------------------------------------------------------
// FrameDispatcher: allocation and callback invocation
// ----------------------------------------------------------------------------

/// Frame allocation and callback dispatch, shared with delivery threads.
///
/// Callback replacement and invocation are serialised by one lock, so an
/// invocation never observes a partially replaced callback and clearing the
/// callback waits for any invocation in progress.
pub struct FrameDispatcher {
    callback: Mutex<Option<FrameCallback>>,
    archive: Arc<FrameArchive>,
}

impl FrameDispatcher {
    fn new(archive: Arc<FrameArchive>) -> Self {
        Self {
            callback: Mutex::new(None),
            archive,
        }
    }

    /// Allocate a frame from the pool; `None` under backpressure.
    pub fn alloc_frame(&self, size: usize, additional_data: FrameAdditionalData) -> Option<Frame> {
        self.archive.alloc(size, additional_data)
    }

    /// Hand `frame` to the registered callback, or drop it if there is none.
    pub fn invoke_callback(&self, frame: Frame) {
        let mut callback = lock(&self.callback);
        match callback.as_mut() {
            Some(callback) => callback(frame),
            None => log::trace!("no callback registered, frame {} dropped", frame.frame_number()),
        }
    }

    /// Block until every published frame has been released.
    pub fn flush(&self) {
        self.archive.flush();
    }

    pub fn archive(&self) -> &Arc<FrameArchive> {
        &self.archive
    }

    pub(crate) fn set_callback(&self, callback: FrameCallback) {
        *lock(&self.callback) = Some(callback);
    }

    pub(crate) fn clear_callback(&self) {
        let previous = lock(&self.callback).take();
        // Dropped outside the lock; the callback may own frames.
        drop(previous);
    }
}

// ----------------------------------------------------------------------------
// EndpointCore: state shared by every endpoint variant
// ----------------------------------------------------------------------------

pub struct EndpointCore {
    streaming: AtomicBool,
    opened: AtomicBool,
    dispatcher: Arc<FrameDispatcher>,
    pixel_formats: RwLock<Vec<Arc<NativePixelFormat>>>,
    stream_profiles: Lazy<Vec<NativeStreamProfile>>,
    options: Registry<OptionId, Arc<dyn EndpointOption>>,
    camera_info: Registry<CameraInfo, String>,
    pose: OnceLock<Pose>,
}

impl EndpointCore {
    pub fn new(config: &EndpointConfig) -> Self {
        let archive = FrameArchive::new(config.frame_pool_capacity, config.max_publish_list_size);
        Self {
            streaming: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            dispatcher: Arc::new(FrameDispatcher::new(archive)),
            pixel_formats: RwLock::new(Vec::new()),
            stream_profiles: Lazy::new(),
            options: Registry::new(),
            camera_info: Registry::new(),
            pose: OnceLock::new(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    /// Snapshot of registered pixel formats, in registration order.
    pub fn pixel_formats(&self) -> Vec<Arc<NativePixelFormat>> {
        self.pixel_formats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::Release);
    }

    pub(crate) fn set_opened(&self, opened: bool) {
        self.opened.store(opened, Ordering::Release);
    }

    pub(crate) fn ensure_can_open(&self, who: &str) -> Result<()> {
        if self.is_streaming() {
            return Err(EndpointError::precondition(format!(
                "open(...) failed. {} is streaming",
                who
            )));
        }
        if self.is_opened() {
            return Err(EndpointError::precondition(format!(
                "open(...) failed. {} is already opened",
                who
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_can_close(&self, who: &str) -> Result<()> {
        if self.is_streaming() {
            return Err(EndpointError::precondition(format!(
                "close() failed. {} is streaming",
                who
            )));
        }
        if !self.is_opened() {
            return Err(EndpointError::precondition(format!(
                "close() failed. {} was not opened",
                who
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_can_start(&self, who: &str) -> Result<()> {
        if self.is_streaming() {
            return Err(EndpointError::precondition(format!(
                "start_streaming(...) failed. {} is already streaming",
                who
            )));
        }
        if !self.is_opened() {
            return Err(EndpointError::precondition(format!(
                "start_streaming(...) failed. {} was not opened",
                who
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Endpoint: the common capability interface
// ----------------------------------------------------------------------------

/// Contract shared by video and HID endpoints.
///
/// Variants provide enumeration, principal requests and the four lifecycle
/// transitions; everything else is provided on top of [`EndpointCore`].
pub trait Endpoint: Send + Sync {
    fn core(&self) -> &EndpointCore;

    /// Device-specific enumeration of native profiles. Called at most once
    /// successfully per endpoint, through [`Endpoint::stream_profiles`].
    fn init_stream_profiles(&self) -> Result<Vec<NativeStreamProfile>>;

    /// The canonical requests a generic caller should open.
    fn principal_requests(&self) -> Result<Vec<StreamProfile>>;

    fn open(&self, requests: &[StreamProfile]) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn start_streaming(&self, callback: FrameCallback) -> Result<()>;

    /// Stop delivery. No callback runs after this returns. No-op when not streaming.
    fn stop_streaming(&self) -> Result<()>;

    /// Native profiles, enumerated lazily on first call and cached afterwards.
    fn stream_profiles(&self) -> Result<&[NativeStreamProfile]> {
        self.core()
            .stream_profiles
            .get_or_try_init(|| self.init_stream_profiles())
            .map(Vec::as_slice)
    }

    fn resolve_requests(&self, requests: &[StreamProfile]) -> Result<Vec<RequestMapping>> {
        let profiles = self.stream_profiles()?;
        resolve_requests(requests, &self.core().pixel_formats(), profiles)
    }

    fn register_pixel_format(&self, pixel_format: NativePixelFormat) {
        self.core()
            .pixel_formats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(pixel_format));
    }

    fn is_streaming(&self) -> bool {
        self.core().is_streaming()
    }

    fn is_opened(&self) -> bool {
        self.core().is_opened()
    }

    fn alloc_frame(&self, size: usize, additional_data: FrameAdditionalData) -> Option<Frame> {
        self.core().dispatcher.alloc_frame(size, additional_data)
    }

    fn invoke_callback(&self, frame: Frame) {
        self.core().dispatcher.invoke_callback(frame);
    }

    fn flush(&self) {
        self.core().dispatcher.flush();
    }

    fn set_max_publish_list_size(&self, size: u32) {
        self.core()
            .dispatcher
            .archive()
            .set_max_publish_list_size(size);
    }

    /// Register an option. Returns false if `id` was already registered.
    fn register_option(&self, id: OptionId, option: Arc<dyn EndpointOption>) -> bool {
        self.core().options.register(id, option)
    }

    fn get_option(&self, id: OptionId) -> Result<Arc<dyn EndpointOption>> {
        self.core()
            .options
            .get(id)
            .ok_or_else(|| EndpointError::NotSupported(format!("option {:?}", id)))
    }

    fn supports_option(&self, id: OptionId) -> bool {
        self.core().options.contains(id)
    }

    fn supported_options(&self) -> Vec<OptionId> {
        self.core().options.keys()
    }

    /// Register a camera-info field. Returns false if it was already registered.
    fn register_info(&self, info: CameraInfo, value: &str) -> bool {
        self.core().camera_info.register(info, value.to_string())
    }

    fn get_info(&self, info: CameraInfo) -> Result<String> {
        self.core()
            .camera_info
            .get(info)
            .ok_or_else(|| EndpointError::NotSupported(format!("camera info {:?}", info)))
    }

    fn supports_info(&self, info: CameraInfo) -> bool {
        self.core().camera_info.contains(info)
    }

    fn set_pose(&self, pose: Pose) -> Result<()> {
        self.core()
            .pose
            .set(pose)
            .map_err(|_| EndpointError::precondition("pose is already set"))
    }

    /// Pose relative to the device; identity until set.
    fn pose(&self) -> Pose {
        self.core().pose.get().copied().unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// SensorEndpoint: closed set of endpoint variants
// ----------------------------------------------------------------------------

/// Endpoint variant selected when a sensing interface is discovered.
#[derive(Clone)]
pub enum SensorEndpoint {
    Video(Arc<UvcEndpoint>),
    Hid(Arc<HidEndpoint>),
}

impl SensorEndpoint {
    pub fn video(device: Arc<dyn UvcDevice>, config: &EndpointConfig) -> Self {
        SensorEndpoint::Video(UvcEndpoint::new(device, config))
    }

    pub fn hid(device: Arc<dyn HidDevice>, config: &EndpointConfig) -> Result<Self> {
        Ok(SensorEndpoint::Hid(HidEndpoint::new(device, config)?))
    }

    pub fn as_endpoint(&self) -> &(dyn Endpoint + 'static) {
        match self {
            SensorEndpoint::Video(endpoint) => endpoint.as_ref(),
            SensorEndpoint::Hid(endpoint) => endpoint.as_ref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorEndpoint::Video(_) => "video",
            SensorEndpoint::Hid(_) => "hid",
        }
    }

    pub fn as_video(&self) -> Option<&Arc<UvcEndpoint>> {
        match self {
            SensorEndpoint::Video(endpoint) => Some(endpoint),
            SensorEndpoint::Hid(_) => None,
        }
    }

    pub fn as_hid(&self) -> Option<&Arc<HidEndpoint>> {
        match self {
            SensorEndpoint::Hid(endpoint) => Some(endpoint),
            SensorEndpoint::Video(_) => None,
        }
    }
}

impl std::ops::Deref for SensorEndpoint {
    type Target = dyn Endpoint;

    fn deref(&self) -> &Self::Target {
        self.as_endpoint()
    }
}
