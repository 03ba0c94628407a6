//! Stream profiles, native pixel formats and request resolution.
//!
//! A *native* stream profile is what the hardware reports it can produce.
//! A *requested* stream profile is what an application asks for. Registered
//! native pixel formats bridge the two: each one names a hardware fourcc and
//! one or more unpackers that turn a native frame into logical output frames.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, Result};

/// Logical stream kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Any,
    Depth,
    Color,
    Infrared,
    Infrared2,
    Fisheye,
    Gyro,
    Accel,
}

/// Logical output format of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Matches any format in a request.
    Any,
    Z16,
    Disparity16,
    Yuyv,
    Uyvy,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Y8,
    Y16,
    Raw16,
    MotionRaw,
    MotionData,
}

impl Format {
    /// Bytes per decoded pixel. Zero for formats without a fixed pixel size.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Format::Y8 => 1,
            Format::Z16
            | Format::Disparity16
            | Format::Yuyv
            | Format::Uyvy
            | Format::Y16
            | Format::Raw16 => 2,
            Format::Rgb8 | Format::Bgr8 => 3,
            Format::Rgba8 | Format::Bgra8 => 4,
            Format::Any | Format::MotionRaw | Format::MotionData => 0,
        }
    }
}

/// Pack a four-character code the way UVC descriptors spell it.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

pub fn fourcc_to_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Application-level stream request. Zero dimensions/rate and `Format::Any`
/// are wildcards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub stream: StreamKind,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub fps: u32,
    #[serde(default = "any_format")]
    pub format: Format,
}

fn any_format() -> Format {
    Format::Any
}

impl StreamProfile {
    pub fn new(stream: StreamKind, width: u32, height: u32, fps: u32, format: Format) -> Self {
        Self {
            stream,
            width,
            height,
            fps,
            format,
        }
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}x{} @{}fps {:?}",
            self.stream, self.width, self.height, self.fps, self.format
        )
    }
}

/// Hardware-reported capability. Immutable once enumerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeStreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Raw fourcc tag.
    pub format: u32,
}

impl NativeStreamProfile {
    pub fn new(width: u32, height: u32, fps: u32, format: u32) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }

    fn matches(&self, pf: &NativePixelFormat, request: &StreamProfile) -> bool {
        self.format == pf.fourcc
            && (request.width == 0 || request.width == self.width)
            && (request.height == 0 || request.height == self.height)
            && (request.fps == 0 || request.fps == self.fps)
    }
}

impl fmt::Display for NativeStreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @{}fps",
            fourcc_to_string(self.format),
            self.width,
            self.height,
            self.fps
        )
    }
}

/// Decodes one native frame into one destination buffer per unpacker output.
pub type UnpackFn = fn(dest: &mut [&mut [u8]], source: &[u8], width: u32, height: u32);

/// Copies the native bytes verbatim into every destination.
pub fn copy_pixels(dest: &mut [&mut [u8]], source: &[u8], _width: u32, _height: u32) {
    for plane in dest.iter_mut() {
        let n = plane.len().min(source.len());
        plane[..n].copy_from_slice(&source[..n]);
    }
}

#[derive(Clone, Debug)]
pub struct PixelFormatUnpacker {
    pub requires_processing: bool,
    pub unpack: UnpackFn,
    pub outputs: Vec<(StreamKind, Format)>,
}

impl PixelFormatUnpacker {
    pub fn format_for(&self, stream: StreamKind) -> Option<Format> {
        self.outputs
            .iter()
            .find(|(kind, _)| *kind == stream)
            .map(|(_, format)| *format)
    }

    pub fn satisfies(&self, request: &StreamProfile) -> bool {
        match self.format_for(request.stream) {
            Some(format) => request.format == Format::Any || request.format == format,
            None => false,
        }
    }
}

/// Maps a raw native fourcc to logical output streams.
#[derive(Clone, Debug)]
pub struct NativePixelFormat {
    pub fourcc: u32,
    pub plane_count: usize,
    pub bytes_per_pixel: usize,
    pub unpackers: Vec<PixelFormatUnpacker>,
}

impl NativePixelFormat {
    /// Size in bytes of a raw image of the given dimensions.
    pub fn image_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.plane_count * self.bytes_per_pixel
    }
}

fn single_output(
    code: &[u8; 4],
    bytes_per_pixel: usize,
    stream: StreamKind,
    format: Format,
) -> NativePixelFormat {
    NativePixelFormat {
        fourcc: fourcc(code),
        plane_count: 1,
        bytes_per_pixel,
        unpackers: vec![PixelFormatUnpacker {
            requires_processing: false,
            unpack: copy_pixels,
            outputs: vec![(stream, format)],
        }],
    }
}

/// YUY2 color.
pub fn pf_yuy2() -> NativePixelFormat {
    single_output(b"YUY2", 2, StreamKind::Color, Format::Yuyv)
}

/// 16-bit depth.
pub fn pf_z16() -> NativePixelFormat {
    single_output(b"Z16 ", 2, StreamKind::Depth, Format::Z16)
}

/// 8-bit infrared.
pub fn pf_y8() -> NativePixelFormat {
    single_output(b"GREY", 1, StreamKind::Infrared, Format::Y8)
}

pub fn pf_accel_axes() -> NativePixelFormat {
    single_output(b"ACCL", 1, StreamKind::Accel, Format::MotionData)
}

pub fn pf_gyro_axes() -> NativePixelFormat {
    single_output(b"GYRO", 1, StreamKind::Gyro, Format::MotionData)
}

/// Resolved pairing of requests to a native profile and the pixel format
/// unpacker that satisfies them.
#[derive(Clone, Debug)]
pub struct RequestMapping {
    pub profile: NativeStreamProfile,
    pub pixel_format: Arc<NativePixelFormat>,
    pub unpacker_index: usize,
    /// Requests served by this mapping, in request order.
    pub requests: Vec<StreamProfile>,
}

impl RequestMapping {
    pub fn unpacker(&self) -> &PixelFormatUnpacker {
        &self.pixel_format.unpackers[self.unpacker_index]
    }

    /// Size of the raw native image described by this mapping.
    pub fn image_size(&self) -> usize {
        self.pixel_format
            .image_size(self.profile.width, self.profile.height)
    }

    /// Size of one decoded output frame, falling back to the raw size for
    /// formats without a fixed pixel size.
    pub fn output_size(&self, format: Format, raw_len: usize) -> usize {
        match format.bytes_per_pixel() {
            0 => raw_len,
            bpp => bpp * self.profile.width as usize * self.profile.height as usize,
        }
    }

    fn serves(&self, pf: &Arc<NativePixelFormat>, unpacker_index: usize) -> bool {
        Arc::ptr_eq(&self.pixel_format, pf) && self.unpacker_index == unpacker_index
    }
}

/// First registered pixel format whose fourcc matches the native profile.
pub fn find_pixel_format<'a>(
    pixel_formats: &'a [Arc<NativePixelFormat>],
    profile: &NativeStreamProfile,
) -> Option<&'a Arc<NativePixelFormat>> {
    pixel_formats.iter().find(|pf| pf.fourcc == profile.format)
}

/// Resolve every request against registered pixel formats and native profiles.
///
/// The first registered pixel format (and first unpacker within it) able to
/// serve a request wins. A request prefers a native profile already chosen for
/// an earlier request so that requests sharing one native stream share one
/// mapping. Fails as a whole if any request cannot be satisfied.
pub fn resolve_requests(
    requests: &[StreamProfile],
    pixel_formats: &[Arc<NativePixelFormat>],
    profiles: &[NativeStreamProfile],
) -> Result<Vec<RequestMapping>> {
    if requests.is_empty() {
        return Err(EndpointError::InvalidArgument(
            "no streams requested".to_string(),
        ));
    }

    let mut mappings: Vec<RequestMapping> = Vec::new();
    for request in requests {
        if let Some(existing) = mappings.iter_mut().find(|m| {
            m.unpacker().satisfies(request) && m.profile.matches(&m.pixel_format, request)
        }) {
            if !existing.requests.contains(request) {
                existing.requests.push(*request);
            }
            continue;
        }

        let (pf, unpacker_index, profile) =
            find_native(request, pixel_formats, profiles).ok_or_else(|| {
                EndpointError::ProfileNotFound(request.to_string())
            })?;

        match mappings
            .iter_mut()
            .find(|m| m.profile == profile && m.serves(pf, unpacker_index))
        {
            Some(existing) => existing.requests.push(*request),
            None => mappings.push(RequestMapping {
                profile,
                pixel_format: Arc::clone(pf),
                unpacker_index,
                requests: vec![*request],
            }),
        }
    }
    Ok(mappings)
}

fn find_native<'a>(
    request: &StreamProfile,
    pixel_formats: &'a [Arc<NativePixelFormat>],
    profiles: &[NativeStreamProfile],
) -> Option<(&'a Arc<NativePixelFormat>, usize, NativeStreamProfile)> {
    for pf in pixel_formats {
        for (index, unpacker) in pf.unpackers.iter().enumerate() {
            if !unpacker.satisfies(request) {
                continue;
            }
            if let Some(profile) = profiles.iter().find(|p| p.matches(pf, request)) {
                return Some((pf, index, *profile));
            }
        }
    }
    None
}
