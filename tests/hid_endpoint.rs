use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sensor_endpoint::transport::{DeviceEvent, SyntheticHidDevice};
use sensor_endpoint::{EndpointConfig, Format, Frame, SensorEndpoint, StreamKind, StreamProfile};

#[test]
fn streams_motion_samples_per_sensor() {
    let device = Arc::new(SyntheticHidDevice::motion_module().with_auto_delivery());
    let config = EndpointConfig {
        hid_sampling_frequency: 200,
        ..EndpointConfig::default()
    };
    let endpoint = SensorEndpoint::hid(device.clone(), &config).expect("hid endpoint");
    assert_eq!(endpoint.name(), "hid");

    let requests = endpoint.principal_requests().unwrap();
    assert_eq!(
        requests,
        vec![
            StreamProfile::new(StreamKind::Gyro, 0, 0, 0, Format::MotionData),
            StreamProfile::new(StreamKind::Accel, 0, 0, 0, Format::MotionData),
        ]
    );
    endpoint.open(&requests).unwrap();

    let seen: Arc<Mutex<HashMap<StreamKind, Vec<u64>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    endpoint
        .start_streaming(Box::new(move |frame: Frame| {
            assert_eq!(frame.data().len(), 12);
            assert_eq!(frame.additional_data().fps, 200);
            sink.lock()
                .unwrap()
                .entry(frame.stream())
                .or_default()
                .push(frame.frame_number());
        }))
        .unwrap();

    for _ in 0..500 {
        let ready = {
            let seen = seen.lock().unwrap();
            seen.values().filter(|numbers| numbers.len() >= 5).count() == 2
        };
        if ready {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    endpoint.stop_streaming().unwrap();
    assert!(!device.is_capturing());
    assert!(!device.is_open());

    let snapshot = seen.lock().unwrap().clone();
    for stream in [StreamKind::Gyro, StreamKind::Accel] {
        let numbers = &snapshot[&stream];
        assert!(numbers.len() >= 5, "{:?}: {:?}", stream, numbers);
        assert!(numbers.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(numbers[0], 1);
    }

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(*seen.lock().unwrap(), snapshot, "no samples after stop");
    endpoint.close().unwrap();
    assert!(!endpoint.is_opened());
}

#[test]
fn capture_is_configured_with_selected_sensors() {
    let device = Arc::new(SyntheticHidDevice::motion_module());
    let endpoint = SensorEndpoint::hid(device.clone(), &EndpointConfig::default()).unwrap();

    endpoint
        .open(&[StreamProfile::new(StreamKind::Accel, 0, 0, 0, Format::Any)])
        .unwrap();
    endpoint.start_streaming(Box::new(|_frame: Frame| {})).unwrap();
    endpoint.stop_streaming().unwrap();
    endpoint.close().unwrap();

    assert_eq!(
        device.events(),
        vec![
            DeviceEvent::Open,
            DeviceEvent::HidClose,
            DeviceEvent::Open,
            DeviceEvent::CaptureOn(vec![1]),
            DeviceEvent::CaptureOff,
            DeviceEvent::HidClose,
        ]
    );
}

#[test]
fn lifecycle_misuse_is_a_precondition_error() {
    let device = Arc::new(SyntheticHidDevice::motion_module());
    let endpoint = SensorEndpoint::hid(device, &EndpointConfig::default()).unwrap();
    let request = [StreamProfile::new(StreamKind::Gyro, 0, 0, 0, Format::Any)];

    assert!(endpoint.close().unwrap_err().is_precondition());
    endpoint.open(&request).unwrap();
    assert!(endpoint.open(&request).unwrap_err().is_precondition());
    endpoint.start_streaming(Box::new(|_frame: Frame| {})).unwrap();
    assert!(endpoint.close().unwrap_err().is_precondition());
    endpoint.stop_streaming().unwrap();
    endpoint.close().unwrap();
}

#[test]
fn dropping_a_streaming_endpoint_stops_capture() {
    let device = Arc::new(SyntheticHidDevice::motion_module().with_auto_delivery());
    let endpoint = SensorEndpoint::hid(device.clone(), &EndpointConfig::default()).unwrap();
    endpoint
        .open(&endpoint.principal_requests().unwrap())
        .unwrap();
    endpoint.start_streaming(Box::new(|_frame: Frame| {})).unwrap();
    assert!(device.is_capturing());

    drop(endpoint);
    assert!(!device.is_capturing());
    assert!(!device.is_open());
}
