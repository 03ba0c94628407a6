//! Video-class (UVC) endpoint.
//!
//! Device power is reference counted. Every operation that needs the device
//! powered holds a [`PowerGate`]: `open` keeps one until `close`, streaming
//! keeps a second one until `stop_streaming`, and [`UvcEndpoint::invoke_powered`]
//! takes a transient one around a single action. The first gate powers the
//! device on and initialises the registered extension units; the last one
//! powers it off.
//!
//! Lock order: configuration state, then power. The frame callback lock is
//! never taken while holding either.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use anyhow::anyhow;

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::frame::FrameAdditionalData;
use crate::option::{EndpointOption, OptionId, OptionRange};
use crate::stream::{
    find_pixel_format, fourcc_to_string, NativeStreamProfile, RequestMapping, StreamProfile,
};
use crate::timestamp::{FrameTimestampReader, RollingCounterLayout, RollingTimestampReader};
use crate::transport::{ExtensionUnit, PowerState, RawFrameCallback, UvcDevice};
use crate::lock;

use super::{system_time_ms, Endpoint, EndpointCore, FrameCallback, FrameDispatcher};

const NAME: &str = "UvcEndpoint";

// ----------------------------------------------------------------------------
// PowerGate
// ----------------------------------------------------------------------------

/// Scoped power reference on a [`UvcEndpoint`].
///
/// Holds the endpoint weakly. If the endpoint is already gone when the gate is
/// dropped, release is a no-op; the endpoint powers the device off itself on
/// destruction.
#[must_use = "power is released when the gate is dropped"]
pub struct PowerGate {
    endpoint: Weak<UvcEndpoint>,
}

impl PowerGate {
    /// Take a power reference, powering the device on if it is the first.
    pub fn acquire(endpoint: &UvcEndpoint) -> Result<Self> {
        endpoint.acquire_power()?;
        Ok(Self {
            endpoint: endpoint.this.clone(),
        })
    }
}

impl Drop for PowerGate {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.release_power();
        }
    }
}

impl std::fmt::Debug for PowerGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerGate")
            .field("alive", &(self.endpoint.strong_count() > 0))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// UvcEndpoint
// ----------------------------------------------------------------------------

#[derive(Default)]
struct VideoState {
    configuration: Vec<RequestMapping>,
    open_power: Option<PowerGate>,
    streaming_power: Option<PowerGate>,
}

/// Endpoint over a video-class transport device.
pub struct UvcEndpoint {
    core: EndpointCore,
    device: Arc<dyn UvcDevice>,
    this: Weak<UvcEndpoint>,
    timestamp_layout: RollingCounterLayout,
    user_count: AtomicUsize,
    power_lock: Mutex<()>,
    xus: RwLock<Vec<ExtensionUnit>>,
    pus: RwLock<Vec<OptionId>>,
    state: Mutex<VideoState>,
}

impl UvcEndpoint {
    pub fn new(device: Arc<dyn UvcDevice>, config: &EndpointConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: EndpointCore::new(config),
            device,
            this: this.clone(),
            timestamp_layout: config.rolling_timestamp,
            user_count: AtomicUsize::new(0),
            power_lock: Mutex::new(()),
            xus: RwLock::new(Vec::new()),
            pus: RwLock::new(Vec::new()),
            state: Mutex::new(VideoState::default()),
        })
    }

    pub fn device(&self) -> &Arc<dyn UvcDevice> {
        &self.device
    }

    /// Number of outstanding power references.
    pub fn power_users(&self) -> usize {
        self.user_count.load(Ordering::Acquire)
    }

    /// Run `action` against the device with power guaranteed for its duration.
    pub fn invoke_powered<T>(&self, action: impl FnOnce(&dyn UvcDevice) -> T) -> Result<T> {
        let _gate = PowerGate::acquire(self)?;
        Ok(action(self.device.as_ref()))
    }

    /// Add an extension unit to initialise on every power-up.
    pub fn register_xu(&self, xu: ExtensionUnit) {
        self.xus
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(xu);
    }

    /// Expose a processing-unit control as an endpoint option.
    ///
    /// Returns false if an option with this id was already registered.
    pub fn register_pu(&self, id: OptionId) -> bool {
        self.pus
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        let option = UvcPuOption {
            endpoint: self.this.clone(),
            id,
        };
        self.register_option(id, Arc::new(option))
    }

    pub fn extension_units(&self) -> Vec<ExtensionUnit> {
        self.xus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn processing_units(&self) -> Vec<OptionId> {
        self.pus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fresh timestamp reader for one configured stream.
    pub fn create_timestamp_reader(&self) -> Box<dyn FrameTimestampReader> {
        Box::new(RollingTimestampReader::new(self.timestamp_layout))
    }

    /// Resolved configuration of the last successful `open`.
    pub fn configuration(&self) -> Vec<RequestMapping> {
        lock(&self.state).configuration.clone()
    }

    fn acquire_power(&self) -> Result<()> {
        let _guard = lock(&self.power_lock);
        if self.user_count.load(Ordering::Acquire) == 0 {
            self.device
                .set_power_state(PowerState::D0)
                .map_err(|err| EndpointError::Power(format!("power on failed: {:#}", err)))?;
            for xu in self.extension_units() {
                if let Err(err) = self.device.init_xu(&xu) {
                    if let Err(off) = self.device.set_power_state(PowerState::D3) {
                        log::warn!("{}: power off after failed XU init: {:#}", NAME, off);
                    }
                    return Err(EndpointError::Power(format!(
                        "extension unit {} init failed: {:#}",
                        xu.unit, err
                    )));
                }
            }
            log::info!("{}: device powered on", NAME);
        }
        self.user_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release_power(&self) {
        let _guard = lock(&self.power_lock);
        if self.user_count.load(Ordering::Acquire) == 0 {
            log::warn!("{}: power released with no users", NAME);
            return;
        }
        if self.user_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            match self.device.set_power_state(PowerState::D3) {
                Ok(()) => log::info!("{}: device powered off", NAME),
                Err(err) => log::warn!("{}: power off failed: {:#}", NAME, err),
            }
        }
    }
}

/// Native profiles of `mappings`, first occurrence order.
fn unique_profiles(mappings: &[RequestMapping]) -> Vec<NativeStreamProfile> {
    let mut profiles: Vec<NativeStreamProfile> = Vec::new();
    for mapping in mappings {
        if !profiles.contains(&mapping.profile) {
            profiles.push(mapping.profile);
        }
    }
    profiles
}

/// Validate, timestamp, unpack and dispatch one raw frame for one mapping.
fn deliver_video_frame(
    dispatcher: &FrameDispatcher,
    mapping: &RequestMapping,
    reader: &mut dyn FrameTimestampReader,
    data: &[u8],
) {
    if !reader.validate_frame(mapping, data) {
        log::debug!("{}: invalid frame on {} dropped", NAME, mapping.profile);
        return;
    }
    let timestamp = reader.frame_timestamp(mapping, data);
    let frame_number = reader.frame_counter(mapping, data);
    let system_time = system_time_ms();

    let unpacker = mapping.unpacker();
    let mut frames = Vec::with_capacity(unpacker.outputs.len());
    for &(stream, format) in &unpacker.outputs {
        let additional_data = FrameAdditionalData {
            timestamp,
            frame_number,
            system_time,
            width: mapping.profile.width,
            height: mapping.profile.height,
            fps: mapping.profile.fps,
            stream,
            format,
        };
        let size = mapping.output_size(format, data.len());
        match dispatcher.alloc_frame(size, additional_data) {
            Some(frame) => frames.push(frame),
            None => {
                log::debug!(
                    "{}: frame {} on {} dropped under backpressure",
                    NAME,
                    frame_number,
                    mapping.profile
                );
                return;
            }
        }
    }

    {
        let mut planes: Vec<&mut [u8]> = frames.iter_mut().map(|f| f.data_mut()).collect();
        (unpacker.unpack)(
            &mut planes,
            data,
            mapping.profile.width,
            mapping.profile.height,
        );
    }
    log::trace!("{}: frame {} ts {} on {}", NAME, frame_number, timestamp, mapping.profile);
    for frame in frames {
        dispatcher.invoke_callback(frame);
    }
}

impl Endpoint for UvcEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn init_stream_profiles(&self) -> Result<Vec<NativeStreamProfile>> {
        let _gate = PowerGate::acquire(self)?;
        let mut profiles = Vec::new();
        for profile in self.device.profiles()? {
            if !profiles.contains(&profile) {
                profiles.push(profile);
            }
        }
        log::info!("{}: enumerated {} native profiles", NAME, profiles.len());
        Ok(profiles)
    }

    fn principal_requests(&self) -> Result<Vec<StreamProfile>> {
        let profiles = self.stream_profiles()?;
        let pixel_formats = self.core.pixel_formats();

        let mut requests = BTreeSet::new();
        let mut unutilized = BTreeSet::new();
        for profile in profiles {
            match find_pixel_format(&pixel_formats, profile) {
                Some(pf) => {
                    for unpacker in &pf.unpackers {
                        for &(stream, format) in &unpacker.outputs {
                            requests.insert(StreamProfile::new(
                                stream,
                                profile.width,
                                profile.height,
                                profile.fps,
                                format,
                            ));
                        }
                    }
                }
                None => {
                    unutilized.insert(profile.format);
                }
            }
        }
        for code in unutilized {
            log::warn!("{}: unutilized native format {}", NAME, fourcc_to_string(code));
        }
        Ok(requests.into_iter().rev().collect())
    }

    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let mut state = lock(&self.state);
        self.core.ensure_can_open(NAME)?;

        let gate = PowerGate::acquire(self)?;
        let mappings = self.resolve_requests(requests)?;

        let mut committed: Vec<NativeStreamProfile> = Vec::new();
        for profile in unique_profiles(&mappings) {
            if let Err(err) = self.device.probe_and_commit(&profile) {
                for done in committed.iter().rev() {
                    if let Err(close_err) = self.device.close(done) {
                        log::warn!("{}: rollback close of {} failed: {:#}", NAME, done, close_err);
                    }
                }
                return Err(err.into());
            }
            committed.push(profile);
        }

        log::info!(
            "{}: opened {} request(s) on {} native profile(s)",
            NAME,
            requests.len(),
            committed.len()
        );
        state.configuration = mappings;
        state.open_power = Some(gate);
        self.core.set_opened(true);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        self.core.ensure_can_close(NAME)?;

        let mut first_err = None;
        for profile in unique_profiles(&state.configuration) {
            if let Err(err) = self.device.close(&profile) {
                log::warn!("{}: close of {} failed: {:#}", NAME, profile, err);
                first_err.get_or_insert(err);
            }
        }
        state.configuration.clear();
        let gate = state.open_power.take();
        self.core.set_opened(false);
        drop(gate);
        log::info!("{}: closed", NAME);

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn start_streaming(&self, callback: FrameCallback) -> Result<()> {
        let mut state = lock(&self.state);
        self.core.ensure_can_start(NAME)?;

        let gate = PowerGate::acquire(self)?;
        let dispatcher = Arc::clone(self.core.dispatcher());
        dispatcher.set_callback(callback);

        let mut streams: Vec<(NativeStreamProfile, RawFrameCallback)> = Vec::new();
        for profile in unique_profiles(&state.configuration) {
            let mappings: Vec<RequestMapping> = state
                .configuration
                .iter()
                .filter(|m| m.profile == profile)
                .cloned()
                .collect();
            let mut readers: Vec<Box<dyn FrameTimestampReader>> =
                mappings.iter().map(|_| self.create_timestamp_reader()).collect();
            let dispatcher = Arc::clone(&dispatcher);
            let on_frame: RawFrameCallback = Box::new(move |_native, data| {
                for (mapping, reader) in mappings.iter().zip(readers.iter_mut()) {
                    deliver_video_frame(&dispatcher, mapping, reader.as_mut(), data);
                }
            });
            streams.push((profile, on_frame));
        }

        if let Err(err) = self.device.stream_on(streams) {
            dispatcher.clear_callback();
            return Err(err.into());
        }
        state.streaming_power = Some(gate);
        self.core.set_streaming(true);
        log::info!("{}: streaming started", NAME);
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if !self.core.is_streaming() {
            return Ok(());
        }

        let result = self.device.stream_off();
        self.core.set_streaming(false);
        let dispatcher = self.core.dispatcher();
        dispatcher.clear_callback();
        dispatcher.flush();
        let gate = state.streaming_power.take();
        drop(gate);
        log::info!("{}: streaming stopped", NAME);

        result.map_err(Into::into)
    }
}

impl Drop for UvcEndpoint {
    fn drop(&mut self) {
        if let Err(err) = self.stop_streaming() {
            log::warn!("{}: stop on drop failed: {}", NAME, err);
        }
        if self.core.is_opened() {
            if let Err(err) = self.close() {
                log::warn!("{}: close on drop failed: {}", NAME, err);
            }
        }
        let _guard = lock(&self.power_lock);
        if self.user_count.swap(0, Ordering::AcqRel) > 0 {
            match self.device.set_power_state(PowerState::D3) {
                Ok(()) => log::info!("{}: device powered off on drop", NAME),
                Err(err) => log::warn!("{}: power off on drop failed: {:#}", NAME, err),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Processing-unit option
// ----------------------------------------------------------------------------

/// Processing-unit control read and written through a powered device.
pub struct UvcPuOption {
    endpoint: Weak<UvcEndpoint>,
    id: OptionId,
}

impl UvcPuOption {
    fn endpoint(&self) -> anyhow::Result<Arc<UvcEndpoint>> {
        self.endpoint
            .upgrade()
            .ok_or_else(|| anyhow!("endpoint owning {:?} was dropped", self.id))
    }
}

impl EndpointOption for UvcPuOption {
    fn query(&self) -> anyhow::Result<f32> {
        let id = self.id;
        let value = self.endpoint()?.invoke_powered(|device| device.get_pu(id))??;
        Ok(value as f32)
    }

    fn set(&self, value: f32) -> anyhow::Result<()> {
        let id = self.id;
        let raw = value.round() as i32;
        self.endpoint()?
            .invoke_powered(|device| device.set_pu(id, raw))??;
        Ok(())
    }

    fn range(&self) -> anyhow::Result<OptionRange> {
        let id = self.id;
        Ok(self
            .endpoint()?
            .invoke_powered(|device| device.get_pu_range(id))??)
    }

    fn description(&self) -> &str {
        "UVC processing unit control"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::stream::{
        fourcc, pf_yuy2, pf_z16, Format, NativePixelFormat, PixelFormatUnpacker, StreamKind,
    };
    use crate::transport::{DeviceEvent, SyntheticUvcDevice};
    use std::sync::mpsc;

    fn yuy2(width: u32, height: u32, fps: u32) -> NativeStreamProfile {
        NativeStreamProfile::new(width, height, fps, fourcc(b"YUY2"))
    }

    fn setup(profiles: Vec<NativeStreamProfile>) -> (Arc<SyntheticUvcDevice>, Arc<UvcEndpoint>) {
        let device = Arc::new(SyntheticUvcDevice::new(profiles));
        let endpoint = UvcEndpoint::new(device.clone(), &EndpointConfig::default());
        endpoint.register_pixel_format(pf_yuy2());
        (device, endpoint)
    }

    fn frame_bytes(len: usize, counter: i32) -> Vec<u8> {
        let mut data = vec![7u8; len];
        data[..4].copy_from_slice(&counter.to_le_bytes());
        data
    }

    #[test]
    fn nested_gates_power_once() {
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30)]);
        let outer = PowerGate::acquire(&endpoint).unwrap();
        let inner = PowerGate::acquire(&endpoint).unwrap();
        assert_eq!(endpoint.power_users(), 2);
        drop(inner);
        assert_eq!(device.current_power_state(), PowerState::D0);
        drop(outer);
        assert_eq!(device.current_power_state(), PowerState::D3);
        assert_eq!(device.power_on_count(), 1);
        assert_eq!(device.power_off_count(), 1);
    }

    #[test]
    fn failed_power_on_leaves_no_user() {
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30)]);
        device.set_fail_power_on(true);
        let err = PowerGate::acquire(&endpoint).unwrap_err();
        assert!(matches!(err, EndpointError::Power(_)));
        assert_eq!(endpoint.power_users(), 0);

        device.set_fail_power_on(false);
        let gate = PowerGate::acquire(&endpoint).unwrap();
        assert_eq!(endpoint.power_users(), 1);
        drop(gate);
    }

    #[test]
    fn extension_units_init_on_power_up() {
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30)]);
        let xu = ExtensionUnit {
            subdevice: 0,
            unit: 3,
            node: 2,
            id: [0xC9; 16],
        };
        endpoint.register_xu(xu);
        assert_eq!(endpoint.extension_units(), vec![xu]);

        endpoint.invoke_powered(|_| ()).unwrap();
        endpoint.invoke_powered(|_| ()).unwrap();
        let events = device.events();
        assert_eq!(
            events,
            vec![
                DeviceEvent::PowerOn,
                DeviceEvent::XuInit(xu),
                DeviceEvent::PowerOff,
                DeviceEvent::PowerOn,
                DeviceEvent::XuInit(xu),
                DeviceEvent::PowerOff,
            ]
        );
    }

    #[test]
    fn invoke_powered_returns_action_result() {
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30)]);
        let state = endpoint.invoke_powered(|d| d.power_state()).unwrap();
        assert_eq!(state, PowerState::D0);
        assert_eq!(device.current_power_state(), PowerState::D3);
    }

    #[test]
    fn processing_unit_option_goes_through_device() {
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30)]);
        assert!(endpoint.register_pu(OptionId::Gain));
        assert_eq!(endpoint.processing_units(), vec![OptionId::Gain]);

        let gain = endpoint.get_option(OptionId::Gain).unwrap();
        assert_eq!(gain.range().unwrap().max, 128.0);
        gain.set(32.0).unwrap();
        assert_eq!(gain.query().unwrap(), 32.0);
        assert!(gain.set(1000.0).is_err());
        assert_eq!(device.current_power_state(), PowerState::D3);
    }

    #[test]
    fn principal_requests_are_sorted_descending() {
        let (_device, endpoint) = setup(vec![
            yuy2(640, 480, 30),
            yuy2(1280, 720, 30),
            yuy2(640, 480, 30),
            NativeStreamProfile::new(320, 240, 30, fourcc(b"MJPG")),
        ]);
        let requests = endpoint.principal_requests().unwrap();
        assert_eq!(
            requests,
            vec![
                StreamProfile::new(StreamKind::Color, 1280, 720, 30, Format::Yuyv),
                StreamProfile::new(StreamKind::Color, 640, 480, 30, Format::Yuyv),
            ]
        );
        assert_eq!(endpoint.stream_profiles().unwrap().len(), 3);
    }

    #[test]
    fn failed_commit_rolls_back_open() {
        let depth = NativeStreamProfile::new(4, 2, 30, fourcc(b"Z16 "));
        let (device, endpoint) = setup(vec![yuy2(4, 2, 30), depth]);
        endpoint.register_pixel_format(pf_z16());
        device.set_fail_commit(Some(depth));

        let requests = [
            StreamProfile::new(StreamKind::Color, 4, 2, 30, Format::Yuyv),
            StreamProfile::new(StreamKind::Depth, 4, 2, 30, Format::Z16),
        ];
        assert!(matches!(
            endpoint.open(&requests),
            Err(EndpointError::Transport(_))
        ));
        assert!(!endpoint.is_opened());
        assert!(device.committed().is_empty());
        assert_eq!(endpoint.power_users(), 0);
        assert_eq!(device.current_power_state(), PowerState::D3);
    }

    #[test]
    fn invalid_frames_are_dropped_and_valid_frames_timestamped() {
        let profile = yuy2(4, 2, 30);
        let (device, endpoint) = setup(vec![profile]);
        endpoint
            .open(&[StreamProfile::new(StreamKind::Color, 0, 0, 0, Format::Any)])
            .unwrap();

        let (tx, rx) = mpsc::channel::<(u64, f64)>();
        endpoint
            .start_streaming(Box::new(move |frame: Frame| {
                let _ = tx.send((frame.frame_number(), frame.timestamp()));
            }))
            .unwrap();

        assert!(device.deliver(&profile, &[0u8; 16]));
        assert!(device.deliver(&profile, &frame_bytes(16, 1_000)));
        assert!(device.deliver(&profile, &frame_bytes(16, 201_000)));
        assert!(device.deliver(&profile, &[1u8; 3]));
        endpoint.stop_streaming().unwrap();

        let received: Vec<(u64, f64)> = rx.try_iter().collect();
        assert_eq!(received, vec![(1, 0.0), (2, 2.0)]);
        endpoint.close().unwrap();
    }

    fn split_halves(dest: &mut [&mut [u8]], source: &[u8], _w: u32, _h: u32) {
        let half = source.len() / 2;
        dest[0].copy_from_slice(&source[..half]);
        dest[1].copy_from_slice(&source[half..half * 2]);
    }

    #[test]
    fn multi_output_unpacker_dispatches_every_output() {
        let profile = NativeStreamProfile::new(2, 2, 30, fourcc(b"Y8I "));
        let device = Arc::new(SyntheticUvcDevice::new(vec![profile]));
        let endpoint = UvcEndpoint::new(device.clone(), &EndpointConfig::default());
        endpoint.register_pixel_format(NativePixelFormat {
            fourcc: fourcc(b"Y8I "),
            plane_count: 1,
            bytes_per_pixel: 2,
            unpackers: vec![PixelFormatUnpacker {
                requires_processing: true,
                unpack: split_halves,
                outputs: vec![
                    (StreamKind::Infrared, Format::Y8),
                    (StreamKind::Infrared2, Format::Y8),
                ],
            }],
        });
        endpoint
            .open(&[
                StreamProfile::new(StreamKind::Infrared, 2, 2, 30, Format::Y8),
                StreamProfile::new(StreamKind::Infrared2, 2, 2, 30, Format::Y8),
            ])
            .unwrap();
        assert_eq!(endpoint.configuration().len(), 1);

        let (tx, rx) = mpsc::channel::<(StreamKind, Vec<u8>)>();
        endpoint
            .start_streaming(Box::new(move |frame: Frame| {
                let _ = tx.send((frame.stream(), frame.data().to_vec()));
            }))
            .unwrap();
        assert!(device.deliver(&profile, &[1, 0, 0, 0, 5, 6, 7, 8]));
        endpoint.stop_streaming().unwrap();

        let received: Vec<(StreamKind, Vec<u8>)> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                (StreamKind::Infrared, vec![1, 0, 0, 0]),
                (StreamKind::Infrared2, vec![5, 6, 7, 8]),
            ]
        );
    }

    #[test]
    fn drop_while_streaming_powers_device_off() {
        let profile = yuy2(4, 2, 30);
        let (device, endpoint) = setup(vec![profile]);
        endpoint
            .open(&[StreamProfile::new(StreamKind::Color, 4, 2, 30, Format::Yuyv)])
            .unwrap();
        endpoint.start_streaming(Box::new(|_frame: Frame| {})).unwrap();
        assert_eq!(endpoint.power_users(), 2);

        drop(endpoint);
        assert!(!device.is_streaming());
        assert!(device.committed().is_empty());
        assert_eq!(device.current_power_state(), PowerState::D3);
        assert_eq!(device.events().last(), Some(&DeviceEvent::PowerOff));
    }
}
