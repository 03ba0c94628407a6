//! In-memory transport devices.
//!
//! Both devices record every state transition as a [`DeviceEvent`] so tests
//! can assert on ordering, and both support two delivery modes:
//! - manual: the caller pushes raw frames with `deliver`, on its own thread
//! - automatic: a background thread generates frames at the profile rate
//!
//! Synthetic video frames carry a little-endian rolling counter in their first
//! four bytes, advancing 100000 ticks per millisecond, so the counter wraps
//! after a few hundred frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::lock;
use crate::option::{OptionId, OptionRange};
use crate::stream::{fourcc, NativeStreamProfile};

use super::{
    ExtensionUnit, HidDataCallback, HidDevice, HidSensor, IioProfile, PowerState,
    RawFrameCallback, UvcDevice,
};

const TICKS_PER_MS: u64 = 100_000;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_HID_FREQUENCY: u32 = 100;

/// State transition observed by a synthetic device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    PowerOn,
    PowerOff,
    XuInit(ExtensionUnit),
    Commit(NativeStreamProfile),
    Close(NativeStreamProfile),
    StreamOn,
    StreamOff,
    Open,
    CaptureOn(Vec<u32>),
    CaptureOff,
    HidClose,
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(name: &str, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .context("spawn synthetic delivery thread")?;
        Ok(Self { running, handle })
    }

    fn stop(self) {
        self.running.store(false, Ordering::Release);
        if self.handle.join().is_err() {
            log::warn!("synthetic delivery thread panicked");
        }
    }
}

// ----------------------------------------------------------------------------
// Video
// ----------------------------------------------------------------------------

type UvcStreams = Arc<Mutex<Vec<(NativeStreamProfile, RawFrameCallback)>>>;

/// Synthetic video-class device.
pub struct SyntheticUvcDevice {
    profiles: Vec<NativeStreamProfile>,
    auto_delivery: bool,
    enumeration_delay: Duration,
    power: Mutex<PowerState>,
    events: Mutex<Vec<DeviceEvent>>,
    enumerations: AtomicUsize,
    fail_power_on: AtomicBool,
    fail_commit: Mutex<Option<NativeStreamProfile>>,
    committed: Mutex<Vec<NativeStreamProfile>>,
    pu_values: Mutex<HashMap<OptionId, i32>>,
    streams: UvcStreams,
    worker: Mutex<Option<Worker>>,
}

impl SyntheticUvcDevice {
    /// Device with manual delivery.
    pub fn new(profiles: Vec<NativeStreamProfile>) -> Self {
        Self {
            profiles,
            auto_delivery: false,
            enumeration_delay: Duration::ZERO,
            power: Mutex::new(PowerState::D3),
            events: Mutex::new(Vec::new()),
            enumerations: AtomicUsize::new(0),
            fail_power_on: AtomicBool::new(false),
            fail_commit: Mutex::new(None),
            committed: Mutex::new(Vec::new()),
            pu_values: Mutex::new(HashMap::new()),
            streams: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    /// Generate frames on a background thread while streaming.
    pub fn with_auto_delivery(mut self) -> Self {
        self.auto_delivery = true;
        self
    }

    /// Slow down enumeration, widening races on first access.
    pub fn with_enumeration_delay(mut self, delay: Duration) -> Self {
        self.enumeration_delay = delay;
        self
    }

    pub fn set_fail_power_on(&self, fail: bool) {
        self.fail_power_on.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, profile: Option<NativeStreamProfile>) {
        *lock(&self.fail_commit) = profile;
    }

    /// Push one raw frame to the callback armed for `profile`.
    ///
    /// Returns false if no stream for that profile is running.
    pub fn deliver(&self, profile: &NativeStreamProfile, data: &[u8]) -> bool {
        let mut streams = lock(&self.streams);
        match streams.iter_mut().find(|(p, _)| p == profile) {
            Some((p, callback)) => {
                callback(p, data);
                true
            }
            None => false,
        }
    }

    pub fn current_power_state(&self) -> PowerState {
        *lock(&self.power)
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.events).clone()
    }

    pub fn power_on_count(&self) -> usize {
        self.count_events(|e| *e == DeviceEvent::PowerOn)
    }

    pub fn power_off_count(&self) -> usize {
        self.count_events(|e| *e == DeviceEvent::PowerOff)
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Vec<NativeStreamProfile> {
        lock(&self.committed).clone()
    }

    pub fn is_streaming(&self) -> bool {
        !lock(&self.streams).is_empty()
    }

    fn count_events(&self, pred: impl Fn(&DeviceEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: DeviceEvent) {
        lock(&self.events).push(event);
    }

    fn ensure_powered(&self, what: &str) -> Result<()> {
        if *lock(&self.power) != PowerState::D0 {
            bail!("{} requires the device powered", what);
        }
        Ok(())
    }

    fn pu_range(id: OptionId) -> OptionRange {
        let (min, max, default) = match id {
            OptionId::Brightness => (-64.0, 64.0, 0.0),
            OptionId::Contrast => (0.0, 100.0, 50.0),
            OptionId::Exposure => (1.0, 10000.0, 166.0),
            OptionId::Gain => (0.0, 128.0, 64.0),
            OptionId::Gamma => (100.0, 500.0, 300.0),
            OptionId::Hue => (-180.0, 180.0, 0.0),
            OptionId::WhiteBalance => (2800.0, 6500.0, 4600.0),
            OptionId::EnableAutoExposure | OptionId::EnableAutoWhiteBalance => (0.0, 1.0, 1.0),
            _ => (0.0, 255.0, 128.0),
        };
        OptionRange {
            min,
            max,
            step: 1.0,
            default,
        }
    }
}

impl UvcDevice for SyntheticUvcDevice {
    fn profiles(&self) -> Result<Vec<NativeStreamProfile>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if !self.enumeration_delay.is_zero() {
            std::thread::sleep(self.enumeration_delay);
        }
        self.ensure_powered("profile enumeration")?;
        Ok(self.profiles.clone())
    }

    fn set_power_state(&self, state: PowerState) -> Result<()> {
        if state == PowerState::D0 && self.fail_power_on.load(Ordering::SeqCst) {
            bail!("synthetic power-on failure");
        }
        *lock(&self.power) = state;
        self.record(match state {
            PowerState::D0 => DeviceEvent::PowerOn,
            PowerState::D3 => DeviceEvent::PowerOff,
        });
        Ok(())
    }

    fn power_state(&self) -> PowerState {
        self.current_power_state()
    }

    fn init_xu(&self, xu: &ExtensionUnit) -> Result<()> {
        self.ensure_powered("extension unit init")?;
        self.record(DeviceEvent::XuInit(*xu));
        Ok(())
    }

    fn probe_and_commit(&self, profile: &NativeStreamProfile) -> Result<()> {
        self.ensure_powered("probe and commit")?;
        if lock(&self.fail_commit).as_ref() == Some(profile) {
            bail!("synthetic commit failure for {}", profile);
        }
        if !self.profiles.contains(profile) {
            bail!("profile {} not offered by device", profile);
        }
        lock(&self.committed).push(*profile);
        self.record(DeviceEvent::Commit(*profile));
        Ok(())
    }

    fn stream_on(&self, streams: Vec<(NativeStreamProfile, RawFrameCallback)>) -> Result<()> {
        self.ensure_powered("stream on")?;
        {
            let committed = lock(&self.committed);
            if let Some((profile, _)) = streams.iter().find(|(p, _)| !committed.contains(p)) {
                bail!("profile {} was not committed", profile);
            }
        }
        lock(&self.streams).extend(streams);
        self.record(DeviceEvent::StreamOn);

        if self.auto_delivery {
            let streams = Arc::clone(&self.streams);
            let worker = Worker::spawn("synthetic-uvc", move |running| {
                run_uvc_delivery(streams, running)
            })?;
            *lock(&self.worker) = Some(worker);
        }
        Ok(())
    }

    fn stream_off(&self) -> Result<()> {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop();
        }
        // Waits for any manual delivery in progress; drops the callbacks.
        lock(&self.streams).clear();
        self.record(DeviceEvent::StreamOff);
        Ok(())
    }

    fn close(&self, profile: &NativeStreamProfile) -> Result<()> {
        let mut committed = lock(&self.committed);
        let index = committed
            .iter()
            .position(|p| p == profile)
            .ok_or_else(|| anyhow!("profile {} is not committed", profile))?;
        committed.remove(index);
        drop(committed);
        self.record(DeviceEvent::Close(*profile));
        Ok(())
    }

    fn get_pu(&self, id: OptionId) -> Result<i32> {
        self.ensure_powered("processing unit read")?;
        let default = Self::pu_range(id).default as i32;
        Ok(*lock(&self.pu_values).get(&id).unwrap_or(&default))
    }

    fn set_pu(&self, id: OptionId, value: i32) -> Result<()> {
        self.ensure_powered("processing unit write")?;
        let range = Self::pu_range(id);
        if !range.contains(value as f32) {
            bail!("{:?} value {} out of range", id, value);
        }
        lock(&self.pu_values).insert(id, value);
        Ok(())
    }

    fn get_pu_range(&self, id: OptionId) -> Result<OptionRange> {
        self.ensure_powered("processing unit range")?;
        Ok(Self::pu_range(id))
    }
}

impl Drop for SyntheticUvcDevice {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }
    }
}

fn bytes_per_pixel(code: u32) -> usize {
    if code == fourcc(b"GREY") {
        1
    } else if code == fourcc(b"RGB3") || code == fourcc(b"BGR3") {
        3
    } else {
        2
    }
}

fn synthetic_frame(profile: &NativeStreamProfile, counter: u32, seq: u64) -> Vec<u8> {
    let len = profile.width as usize * profile.height as usize * bytes_per_pixel(profile.format);
    let mut frame: Vec<u8> = (0..len)
        .map(|i| ((i as u64 + seq) % 251 + 1) as u8)
        .collect();
    if len >= 4 {
        frame[..4].copy_from_slice(&counter.to_le_bytes());
    }
    frame
}

fn run_uvc_delivery(streams: UvcStreams, running: Arc<AtomicBool>) {
    let mut counters: Vec<u32> = Vec::new();
    let mut seq = 0u64;
    while running.load(Ordering::Acquire) {
        let interval = {
            let mut streams = lock(&streams);
            counters.resize(streams.len(), 0);
            let mut fps = 0;
            for ((profile, callback), counter) in streams.iter_mut().zip(counters.iter_mut()) {
                let frame = synthetic_frame(profile, *counter, seq);
                callback(profile, &frame);
                let rate = if profile.fps == 0 { DEFAULT_FPS } else { profile.fps };
                let ticks = TICKS_PER_MS * 1000 / u64::from(rate);
                *counter = counter.wrapping_add(ticks as u32);
                fps = fps.max(rate);
            }
            Duration::from_millis(1000 / u64::from(fps.max(1)))
        };
        seq += 1;
        std::thread::sleep(interval);
    }
}

// ----------------------------------------------------------------------------
// HID
// ----------------------------------------------------------------------------

type HidCapture = Arc<Mutex<Option<(Vec<HidSensor>, HidDataCallback)>>>;

/// Synthetic motion-sensor device.
pub struct SyntheticHidDevice {
    sensors: Vec<HidSensor>,
    auto_delivery: bool,
    opened: AtomicBool,
    events: Mutex<Vec<DeviceEvent>>,
    capture: HidCapture,
    worker: Mutex<Option<Worker>>,
}

impl SyntheticHidDevice {
    pub fn new(sensors: Vec<HidSensor>) -> Self {
        Self {
            sensors,
            auto_delivery: false,
            opened: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            capture: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Device exposing `gyro_3d` and `accel_3d` at iio indices 0 and 1.
    pub fn motion_module() -> Self {
        Self::new(vec![
            HidSensor {
                name: "gyro_3d".to_string(),
                iio: 0,
            },
            HidSensor {
                name: "accel_3d".to_string(),
                iio: 1,
            },
        ])
    }

    pub fn with_auto_delivery(mut self) -> Self {
        self.auto_delivery = true;
        self
    }

    /// Push one sample for the named sensor. False if it is not being captured.
    pub fn deliver(&self, sensor_name: &str, data: &[u8]) -> bool {
        let mut capture = lock(&self.capture);
        let Some((selected, callback)) = capture.as_mut() else {
            return false;
        };
        match selected.iter().find(|s| s.name == sensor_name) {
            Some(sensor) => {
                callback(sensor, data);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.capture).is_some()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.events).clone()
    }

    fn record(&self, event: DeviceEvent) {
        lock(&self.events).push(event);
    }

    fn ensure_open(&self, what: &str) -> Result<()> {
        if !self.is_open() {
            bail!("{} requires the device open", what);
        }
        Ok(())
    }
}

impl HidDevice for SyntheticHidDevice {
    fn open(&self) -> Result<()> {
        self.opened.store(true, Ordering::SeqCst);
        self.record(DeviceEvent::Open);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.opened.store(false, Ordering::SeqCst);
        self.record(DeviceEvent::HidClose);
        Ok(())
    }

    fn sensors(&self) -> Result<Vec<HidSensor>> {
        self.ensure_open("sensor enumeration")?;
        Ok(self.sensors.clone())
    }

    fn start_capture(&self, profiles: &[IioProfile], callback: HidDataCallback) -> Result<()> {
        self.ensure_open("start capture")?;
        let selected = profiles
            .iter()
            .map(|p| {
                self.sensors
                    .iter()
                    .find(|s| s.iio == p.iio)
                    .cloned()
                    .ok_or_else(|| anyhow!("no sensor at iio {}", p.iio))
            })
            .collect::<Result<Vec<_>>>()?;

        let iios: Vec<u32> = selected.iter().map(|s| s.iio).collect();
        *lock(&self.capture) = Some((selected, callback));
        self.record(DeviceEvent::CaptureOn(iios));

        if self.auto_delivery {
            let frequency = profiles
                .iter()
                .map(|p| p.frequency)
                .find(|&f| f > 0)
                .unwrap_or(DEFAULT_HID_FREQUENCY);
            let capture = Arc::clone(&self.capture);
            let worker = Worker::spawn("synthetic-hid", move |running| {
                run_hid_delivery(capture, frequency, running)
            })?;
            *lock(&self.worker) = Some(worker);
        }
        Ok(())
    }

    fn stop_capture(&self) -> Result<()> {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop();
        }
        *lock(&self.capture) = None;
        self.record(DeviceEvent::CaptureOff);
        Ok(())
    }
}

impl Drop for SyntheticHidDevice {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }
    }
}

fn run_hid_delivery(capture: HidCapture, frequency: u32, running: Arc<AtomicBool>) {
    let interval = Duration::from_micros(1_000_000 / u64::from(frequency.max(1)));
    let mut seq = 0u32;
    while running.load(Ordering::Acquire) {
        {
            let mut capture = lock(&capture);
            if let Some((selected, callback)) = capture.as_mut() {
                for sensor in selected.iter() {
                    let phase = seq as f32 * 0.01 + sensor.iio as f32;
                    let mut sample = Vec::with_capacity(12);
                    for axis in [phase.sin(), phase.cos(), 9.81] {
                        sample.extend_from_slice(&axis.to_le_bytes());
                    }
                    callback(sensor, &sample);
                }
            }
        }
        seq = seq.wrapping_add(1);
        std::thread::sleep(interval);
    }
}
