//! endpoint_demo - drive synthetic video and HID endpoints end to end

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use sensor_endpoint::transport::{SyntheticHidDevice, SyntheticUvcDevice};
use sensor_endpoint::{
    fourcc, pf_y8, pf_yuy2, pf_z16, CameraInfo, Endpoint, EndpointConfig, Frame,
    NativeStreamProfile, OptionId, SensorEndpoint, StreamKind, StreamProfile,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long to stream, in seconds. Ctrl-C stops earlier.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Synthetic video width.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Synthetic video height.
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Synthetic video frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Skip the motion-sensor endpoint.
    #[arg(long)]
    no_hid: bool,
}

#[derive(Default)]
struct StreamCounters {
    color: AtomicU64,
    depth: AtomicU64,
    infrared: AtomicU64,
    motion: AtomicU64,
}

impl StreamCounters {
    fn record(&self, frame: &Frame) {
        let counter = match frame.stream() {
            StreamKind::Color => &self.color,
            StreamKind::Depth => &self.depth,
            StreamKind::Infrared | StreamKind::Infrared2 => &self.infrared,
            StreamKind::Gyro | StreamKind::Accel => &self.motion,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 || args.width == 0 || args.height == 0 {
        return Err(anyhow!("width, height and fps must be >= 1"));
    }

    let config = EndpointConfig::load().context("load endpoint config")?;
    log::info!("endpoint_demo: config {:?}", config);

    let profiles = vec![
        NativeStreamProfile::new(args.width, args.height, args.fps, fourcc(b"YUY2")),
        NativeStreamProfile::new(args.width, args.height, args.fps, fourcc(b"Z16 ")),
        NativeStreamProfile::new(args.width, args.height, args.fps, fourcc(b"GREY")),
    ];
    let video_device = Arc::new(SyntheticUvcDevice::new(profiles).with_auto_delivery());
    let video = SensorEndpoint::video(video_device, &config);
    video.register_pixel_format(pf_yuy2());
    video.register_pixel_format(pf_z16());
    video.register_pixel_format(pf_y8());
    video.register_info(CameraInfo::Name, "Synthetic Depth Camera");
    video.register_info(CameraInfo::SerialNumber, "000000000001");
    if let Some(uvc) = video.as_video() {
        uvc.register_pu(OptionId::Gain);
        uvc.register_pu(OptionId::Exposure);
    }

    let mut endpoints = vec![video];
    if !args.no_hid {
        let hid_device = Arc::new(SyntheticHidDevice::motion_module().with_auto_delivery());
        endpoints.push(SensorEndpoint::hid(hid_device, &config)?);
    }

    let counters = Arc::new(StreamCounters::default());
    for endpoint in &endpoints {
        let requests: Vec<StreamProfile> = match &config.requests {
            Some(requests) => requests
                .iter()
                .copied()
                .filter(|r| endpoint_serves(endpoint, r.stream))
                .collect(),
            None => endpoint.principal_requests()?,
        };
        if requests.is_empty() {
            log::warn!("endpoint_demo: no requests for {} endpoint", endpoint.name());
            continue;
        }
        log::info!(
            "endpoint_demo: opening {} endpoint with {} request(s)",
            endpoint.name(),
            requests.len()
        );
        endpoint.open(&requests)?;
        let counters = Arc::clone(&counters);
        endpoint.start_streaming(Box::new(move |frame: Frame| counters.record(&frame)))?;
    }

    if let Some(uvc) = endpoints[0].as_video() {
        let gain = uvc.get_option(OptionId::Gain)?;
        log::info!(
            "endpoint_demo: gain = {} (range {:?})",
            gain.query()?,
            gain.range()?
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;
    log::info!("endpoint_demo: streaming for {}s (Ctrl-C to stop)", args.seconds);
    if rx.recv_timeout(Duration::from_secs(args.seconds)).is_ok() {
        log::info!("endpoint_demo: shutdown signal received");
    }

    for endpoint in &endpoints {
        if endpoint.is_streaming() {
            endpoint.stop_streaming()?;
        }
        if endpoint.is_opened() {
            endpoint.close()?;
        }
    }

    log::info!(
        "endpoint_demo: frames color={} depth={} infrared={} motion={}",
        counters.color.load(Ordering::Relaxed),
        counters.depth.load(Ordering::Relaxed),
        counters.infrared.load(Ordering::Relaxed),
        counters.motion.load(Ordering::Relaxed)
    );
    Ok(())
}

fn endpoint_serves(endpoint: &SensorEndpoint, stream: StreamKind) -> bool {
    match endpoint {
        SensorEndpoint::Hid(_) => matches!(stream, StreamKind::Gyro | StreamKind::Accel),
        SensorEndpoint::Video(_) => !matches!(stream, StreamKind::Gyro | StreamKind::Accel),
    }
}
