use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use sensor_endpoint::transport::{PowerState, SyntheticHidDevice, SyntheticUvcDevice};
use sensor_endpoint::{
    fourcc, pf_y8, pf_yuy2, pf_z16, Endpoint, EndpointConfig, EndpointError, Format, Frame,
    NativeStreamProfile, RollingCounterLayout, SensorEndpoint, StreamKind, StreamProfile,
    UvcEndpoint,
};

fn color_profile() -> NativeStreamProfile {
    NativeStreamProfile::new(8, 4, 60, fourcc(b"YUY2"))
}

fn depth_profile() -> NativeStreamProfile {
    NativeStreamProfile::new(8, 4, 60, fourcc(b"Z16 "))
}

fn video_endpoint(device: &Arc<SyntheticUvcDevice>) -> Arc<UvcEndpoint> {
    let endpoint = UvcEndpoint::new(device.clone(), &EndpointConfig::default());
    endpoint.register_pixel_format(pf_yuy2());
    endpoint.register_pixel_format(pf_z16());
    endpoint
}

fn raw_frame(len: usize, counter: i32) -> Vec<u8> {
    let mut data = vec![0x5a; len];
    data[..4].copy_from_slice(&counter.to_le_bytes());
    data
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn full_lifecycle_stops_delivery_and_ends_closed() {
    let device = Arc::new(
        SyntheticUvcDevice::new(vec![color_profile(), depth_profile()]).with_auto_delivery(),
    );
    let endpoint = video_endpoint(&device);

    for _ in 0..3 {
        let requests = endpoint.principal_requests().expect("principal requests");
        assert_eq!(requests.len(), 2);
        endpoint.open(&requests).expect("open");
        assert!(endpoint.is_opened());

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        endpoint
            .start_streaming(Box::new(move |_frame: Frame| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("start");
        assert!(endpoint.is_streaming());

        wait_for("frames", || delivered.load(Ordering::SeqCst) >= 6);
        endpoint.stop_streaming().expect("stop");
        let after_stop = delivered.load(Ordering::SeqCst);
        assert!(!endpoint.is_streaming());
        assert!(!device.is_streaming());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(delivered.load(Ordering::SeqCst), after_stop);

        endpoint.close().expect("close");
        assert!(!endpoint.is_opened());
        assert_eq!(device.current_power_state(), PowerState::D3);
        assert_eq!(endpoint.power_users(), 0);
    }
    assert_eq!(device.enumerations(), 1);
}

#[test]
fn lifecycle_misuse_is_a_precondition_error() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile()]));
    let endpoint = video_endpoint(&device);
    let request = [StreamProfile::new(StreamKind::Color, 0, 0, 0, Format::Any)];

    assert!(endpoint.close().unwrap_err().is_precondition());
    assert!(endpoint
        .start_streaming(Box::new(|_frame: Frame| {}))
        .unwrap_err()
        .is_precondition());

    endpoint.open(&request).unwrap();
    assert!(endpoint.open(&request).unwrap_err().is_precondition());

    endpoint.start_streaming(Box::new(|_frame: Frame| {})).unwrap();
    assert!(endpoint.open(&request).unwrap_err().is_precondition());
    assert!(endpoint.close().unwrap_err().is_precondition());
    assert!(endpoint
        .start_streaming(Box::new(|_frame: Frame| {}))
        .unwrap_err()
        .is_precondition());

    endpoint.stop_streaming().unwrap();
    endpoint.stop_streaming().unwrap();
    endpoint.close().unwrap();
    assert_eq!(endpoint.power_users(), 0);
}

#[test]
fn concurrent_first_enumeration_runs_once() {
    const THREADS: usize = 8;
    let device = Arc::new(
        SyntheticUvcDevice::new(vec![color_profile(), depth_profile()])
            .with_enumeration_delay(Duration::from_millis(30)),
    );
    let endpoint = video_endpoint(&device);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let endpoint = Arc::clone(&endpoint);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                endpoint.stream_profiles().expect("profiles").to_vec()
            })
        })
        .collect();

    let results: Vec<Vec<NativeStreamProfile>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(device.enumerations(), 1);
    assert!(results.iter().all(|r| *r == results[0]));
    assert_eq!(results[0], vec![color_profile(), depth_profile()]);
    assert_eq!(device.current_power_state(), PowerState::D3);
}

fn race_open(endpoint: &SensorEndpoint, requests: Vec<StreamProfile>) -> usize {
    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let endpoint = endpoint.clone();
            let barrier = Arc::clone(&barrier);
            let requests = requests.clone();
            std::thread::spawn(move || {
                barrier.wait();
                endpoint.open(&requests)
            })
        })
        .collect();

    let mut opened = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => opened += 1,
            Err(err) => assert!(err.is_precondition(), "{:?}", err),
        }
    }
    opened
}

#[test]
fn concurrent_open_admits_exactly_one_caller() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile(), depth_profile()]));
    let video = SensorEndpoint::Video(video_endpoint(&device));
    let requests = video.principal_requests().unwrap();

    assert_eq!(race_open(&video, requests), 1);
    assert!(video.is_opened());
    let uvc = video.as_video().unwrap();
    assert_eq!(uvc.power_users(), 1);
    assert_eq!(device.committed().len(), 2);
    video.close().unwrap();
    assert_eq!(uvc.power_users(), 0);

    let hid = SensorEndpoint::hid(
        Arc::new(SyntheticHidDevice::motion_module()),
        &EndpointConfig::default(),
    )
    .unwrap();
    let requests = hid.principal_requests().unwrap();

    assert_eq!(race_open(&hid, requests), 1);
    assert!(hid.is_opened());
    assert_eq!(hid.as_hid().unwrap().configured_sensors().len(), 2);
    hid.close().unwrap();
}

#[test]
fn failed_enumeration_is_retried() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile()]));
    let endpoint = video_endpoint(&device);

    device.set_fail_power_on(true);
    assert!(matches!(
        endpoint.stream_profiles(),
        Err(EndpointError::Power(_))
    ));
    device.set_fail_power_on(false);
    assert_eq!(endpoint.stream_profiles().unwrap(), &[color_profile()]);
}

#[test]
fn unsatisfiable_request_leaves_endpoint_closed() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![
        color_profile(),
        NativeStreamProfile::new(8, 4, 60, fourcc(b"GREY")),
    ]));
    let endpoint = video_endpoint(&device);
    let infrared = StreamProfile::new(StreamKind::Infrared, 8, 4, 60, Format::Y8);

    let err = endpoint
        .open(&[
            StreamProfile::new(StreamKind::Color, 8, 4, 60, Format::Yuyv),
            infrared,
        ])
        .unwrap_err();
    assert!(matches!(err, EndpointError::ProfileNotFound(_)));
    assert!(!endpoint.is_opened());
    assert!(device.committed().is_empty());
    assert_eq!(endpoint.power_users(), 0);
    assert_eq!(device.current_power_state(), PowerState::D3);

    endpoint.register_pixel_format(pf_y8());
    endpoint.open(&[infrared]).expect("open after registering Y8");
    endpoint.close().unwrap();
}

#[test]
fn backpressure_drops_frames_without_stopping_the_stream() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile()]));
    let config = EndpointConfig {
        max_publish_list_size: 1,
        ..EndpointConfig::default()
    };
    let endpoint = UvcEndpoint::new(device.clone(), &config);
    endpoint.register_pixel_format(pf_yuy2());
    endpoint
        .open(&[StreamProfile::new(StreamKind::Color, 0, 0, 0, Format::Yuyv)])
        .unwrap();

    let held: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&held);
    endpoint
        .start_streaming(Box::new(move |frame: Frame| sink.lock().unwrap().push(frame)))
        .unwrap();

    let size = 8 * 4 * 2;
    for counter in 0..3 {
        assert!(device.deliver(&color_profile(), &raw_frame(size, counter * 100)));
    }
    assert_eq!(held.lock().unwrap().len(), 1);

    held.lock().unwrap().clear();
    assert!(device.deliver(&color_profile(), &raw_frame(size, 400)));
    {
        let frames = held.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_number(), 4);
    }

    held.lock().unwrap().clear();
    endpoint.stop_streaming().unwrap();
    endpoint.close().unwrap();
}

#[test]
fn unchecked_timestamp_layout_does_not_interrupt_delivery() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile()]));
    let config = EndpointConfig {
        rolling_timestamp: RollingCounterLayout {
            counter_offset: usize::MAX,
            ticks_per_unit: 0,
        },
        ..EndpointConfig::default()
    };
    let endpoint = UvcEndpoint::new(device.clone(), &config);
    endpoint.register_pixel_format(pf_yuy2());
    endpoint
        .open(&[StreamProfile::new(StreamKind::Color, 8, 4, 60, Format::Yuyv)])
        .unwrap();

    let (tx, rx) = mpsc::channel();
    endpoint
        .start_streaming(Box::new(move |frame: Frame| {
            let _ = tx.send((frame.frame_number(), frame.additional_data().timestamp));
        }))
        .unwrap();
    for counter in [10, 20, 30] {
        assert!(device.deliver(&color_profile(), &raw_frame(64, counter)));
    }
    endpoint.stop_streaming().unwrap();
    endpoint.close().unwrap();

    let delivered: Vec<(u64, f64)> = rx.try_iter().collect();
    assert_eq!(delivered, vec![(1, 0.0), (2, 0.0), (3, 0.0)]);
}

#[test]
fn stop_waits_for_frames_held_by_the_application() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![color_profile()]));
    let endpoint = video_endpoint(&device);
    endpoint
        .open(&[StreamProfile::new(StreamKind::Color, 8, 4, 60, Format::Yuyv)])
        .unwrap();

    let (tx, rx) = mpsc::channel::<Frame>();
    endpoint
        .start_streaming(Box::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }))
        .unwrap();
    assert!(device.deliver(&color_profile(), &raw_frame(64, 1)));

    let released = Arc::new(AtomicUsize::new(0));
    let consumer = {
        let released = Arc::clone(&released);
        std::thread::spawn(move || {
            let frame = rx.recv().expect("frame");
            std::thread::sleep(Duration::from_millis(50));
            released.store(1, Ordering::SeqCst);
            drop(frame);
        })
    };

    endpoint.stop_streaming().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(endpoint.core().dispatcher().archive().published(), 0);
    consumer.join().unwrap();
    endpoint.close().unwrap();
}

#[test]
fn frames_carry_profile_metadata() {
    let device = Arc::new(SyntheticUvcDevice::new(vec![depth_profile()]));
    let endpoint = SensorEndpoint::video(device.clone(), &EndpointConfig::default());
    endpoint.register_pixel_format(pf_z16());
    endpoint
        .open(&[StreamProfile::new(StreamKind::Depth, 0, 0, 0, Format::Any)])
        .unwrap();

    let (tx, rx) = mpsc::channel();
    endpoint
        .start_streaming(Box::new(move |frame: Frame| {
            let _ = tx.send(*frame.additional_data());
        }))
        .unwrap();
    assert!(device.deliver(&depth_profile(), &raw_frame(64, 7)));
    endpoint.stop_streaming().unwrap();

    let meta = rx.recv().unwrap();
    assert_eq!(meta.stream, StreamKind::Depth);
    assert_eq!(meta.format, Format::Z16);
    assert_eq!((meta.width, meta.height, meta.fps), (8, 4, 60));
    assert_eq!(meta.frame_number, 1);
    assert!(meta.system_time > 0.0);
    endpoint.close().unwrap();
}
