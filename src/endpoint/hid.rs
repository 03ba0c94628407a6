//! HID motion-sensor endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::frame::FrameAdditionalData;
use crate::stream::{
    fourcc, pf_accel_axes, pf_gyro_axes, Format, NativeStreamProfile, RequestMapping, StreamKind,
    StreamProfile,
};
use crate::transport::{HidDataCallback, HidDevice, HidSensor, IioProfile};
use crate::lock;

use super::{system_time_ms, Endpoint, EndpointCore, FrameCallback, FrameDispatcher};

const NAME: &str = "HidEndpoint";

/// Hardware sensor name to the logical stream it produces.
pub static HID_SENSOR_STREAMS: &[(&str, StreamKind, Format)] = &[
    ("gyro_3d", StreamKind::Gyro, Format::MotionData),
    ("accel_3d", StreamKind::Accel, Format::MotionData),
];

/// Logical stream and format for a hardware sensor name, if known.
pub fn sensor_stream_format(name: &str) -> Option<(StreamKind, Format)> {
    HID_SENSOR_STREAMS
        .iter()
        .find(|(sensor, _, _)| *sensor == name)
        .map(|&(_, stream, format)| (stream, format))
}

fn sensor_name_for(stream: StreamKind) -> Option<&'static str> {
    HID_SENSOR_STREAMS
        .iter()
        .find(|(_, kind, _)| *kind == stream)
        .map(|(name, _, _)| *name)
}

fn stream_fourcc(stream: StreamKind) -> Option<u32> {
    match stream {
        StreamKind::Gyro => Some(fourcc(b"GYRO")),
        StreamKind::Accel => Some(fourcc(b"ACCL")),
        _ => None,
    }
}

#[derive(Default)]
struct HidState {
    configuration: Vec<RequestMapping>,
    configured: Vec<IioProfile>,
}

/// Endpoint over a HID motion-sensor device.
pub struct HidEndpoint {
    core: EndpointCore,
    device: Arc<dyn HidDevice>,
    sensors: Vec<HidSensor>,
    sampling_frequency: u32,
    state: Mutex<HidState>,
}

impl HidEndpoint {
    /// Snapshot the device's sensors and register the motion pixel formats.
    ///
    /// The device is opened only for the duration of the sensor query.
    pub fn new(device: Arc<dyn HidDevice>, config: &EndpointConfig) -> Result<Arc<Self>> {
        device.open()?;
        let sensors = device.sensors();
        if let Err(err) = device.close() {
            log::warn!("{}: close after sensor query failed: {:#}", NAME, err);
        }
        let sensors = sensors?;
        log::info!("{}: found {} sensor(s)", NAME, sensors.len());

        let endpoint = Arc::new(Self {
            core: EndpointCore::new(config),
            device,
            sensors,
            sampling_frequency: config.hid_sampling_frequency,
            state: Mutex::new(HidState::default()),
        });
        endpoint.register_pixel_format(pf_gyro_axes());
        endpoint.register_pixel_format(pf_accel_axes());
        Ok(endpoint)
    }

    pub fn sensors(&self) -> &[HidSensor] {
        &self.sensors
    }

    pub fn configuration(&self) -> Vec<RequestMapping> {
        lock(&self.state).configuration.clone()
    }

    /// Sensors selected by the last successful `open`.
    pub fn configured_sensors(&self) -> Vec<IioProfile> {
        lock(&self.state).configured.clone()
    }

    fn iio_for(&self, stream: StreamKind) -> Result<u32> {
        let name = sensor_name_for(stream).ok_or_else(|| {
            EndpointError::InvalidArgument(format!("no HID sensor produces {:?}", stream))
        })?;
        self.sensors
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.iio)
            .ok_or_else(|| {
                EndpointError::InvalidArgument(format!("sensor {} not present on device", name))
            })
    }
}

fn deliver_hid_sample(
    dispatcher: &FrameDispatcher,
    counters: &mut HashMap<u32, u64>,
    frequency: u32,
    sensor: &HidSensor,
    data: &[u8],
) {
    let Some((stream, format)) = sensor_stream_format(&sensor.name) else {
        log::debug!("{}: sample from unmapped sensor {} dropped", NAME, sensor.name);
        return;
    };
    let counter = counters.entry(sensor.iio).or_insert(0);
    *counter += 1;

    let system_time = system_time_ms();
    let additional_data = FrameAdditionalData {
        timestamp: system_time,
        frame_number: *counter,
        system_time,
        width: 0,
        height: 0,
        fps: frequency,
        stream,
        format,
    };
    let Some(mut frame) = dispatcher.alloc_frame(data.len(), additional_data) else {
        log::debug!("{}: {} sample {} dropped under backpressure", NAME, sensor.name, counter);
        return;
    };
    frame.data_mut().copy_from_slice(data);
    dispatcher.invoke_callback(frame);
}

impl Endpoint for HidEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    fn init_stream_profiles(&self) -> Result<Vec<NativeStreamProfile>> {
        let mut profiles = Vec::new();
        for sensor in &self.sensors {
            let Some((stream, _)) = sensor_stream_format(&sensor.name) else {
                continue;
            };
            if let Some(code) = stream_fourcc(stream) {
                let profile = NativeStreamProfile::new(0, 0, 0, code);
                if !profiles.contains(&profile) {
                    profiles.push(profile);
                }
            }
        }
        Ok(profiles)
    }

    fn principal_requests(&self) -> Result<Vec<StreamProfile>> {
        let mut requests: Vec<StreamProfile> = Vec::new();
        for sensor in &self.sensors {
            match sensor_stream_format(&sensor.name) {
                Some((stream, format)) => {
                    let request = StreamProfile::new(stream, 0, 0, 0, format);
                    if !requests.contains(&request) {
                        requests.push(request);
                    }
                }
                None => log::debug!("{}: sensor {} has no stream mapping", NAME, sensor.name),
            }
        }
        Ok(requests)
    }

    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let mut state = lock(&self.state);
        self.core.ensure_can_open(NAME)?;

        let mappings = self.resolve_requests(requests)?;
        let mut configured: Vec<IioProfile> = Vec::new();
        for mapping in &mappings {
            for &(stream, _) in &mapping.unpacker().outputs {
                let profile = IioProfile {
                    iio: self.iio_for(stream)?,
                    frequency: self.sampling_frequency,
                };
                if !configured.contains(&profile) {
                    configured.push(profile);
                }
            }
        }

        log::info!("{}: opened {} sensor(s)", NAME, configured.len());
        state.configuration = mappings;
        state.configured = configured;
        self.core.set_opened(true);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        self.core.ensure_can_close(NAME)?;
        state.configuration.clear();
        state.configured.clear();
        self.core.set_opened(false);
        log::info!("{}: closed", NAME);
        Ok(())
    }

    fn start_streaming(&self, callback: FrameCallback) -> Result<()> {
        let state = lock(&self.state);
        self.core.ensure_can_start(NAME)?;

        self.device.open()?;
        let dispatcher = Arc::clone(self.core.dispatcher());
        dispatcher.set_callback(callback);

        let mut counters = HashMap::new();
        let frequency = self.sampling_frequency;
        let sink = Arc::clone(&dispatcher);
        let on_sample: HidDataCallback = Box::new(move |sensor, data| {
            deliver_hid_sample(&sink, &mut counters, frequency, sensor, data);
        });
        if let Err(err) = self.device.start_capture(&state.configured, on_sample) {
            dispatcher.clear_callback();
            if let Err(close_err) = self.device.close() {
                log::warn!("{}: close after failed capture start: {:#}", NAME, close_err);
            }
            return Err(err.into());
        }

        self.core.set_streaming(true);
        log::info!("{}: streaming started", NAME);
        Ok(())
    }

    fn stop_streaming(&self) -> Result<()> {
        let _state = lock(&self.state);
        if !self.core.is_streaming() {
            return Ok(());
        }

        let stopped = self.device.stop_capture();
        let closed = self.device.close();
        self.core.set_streaming(false);
        let dispatcher = self.core.dispatcher();
        dispatcher.clear_callback();
        dispatcher.flush();
        log::info!("{}: streaming stopped", NAME);

        stopped.and(closed).map_err(Into::into)
    }
}

impl Drop for HidEndpoint {
    fn drop(&mut self) {
        if let Err(err) = self.stop_streaming() {
            log::warn!("{}: stop on drop failed: {}", NAME, err);
        }
        if self.core.is_opened() {
            if let Err(err) = self.close() {
                log::warn!("{}: close on drop failed: {}", NAME, err);
            }
        }
    }
}
