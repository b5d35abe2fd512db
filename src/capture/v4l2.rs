//! V4L2 camera source for fixed-size raw formats

use std::path::Path;

use bytes::BytesMut;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{PixelFormat, StreamFormat};
use crate::capture::source::CaptureSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// Camera capture through memory-mapped V4L2 buffers
pub struct V4l2Capture {
    device: Device,
    stream: Option<MmapStream<'static>>,
    format: StreamFormat,
    stride: usize,
    buffer_count: u32,
    name: String,
}

fn fourcc(format: PixelFormat) -> Result<FourCC, CaptureError> {
    match format {
        PixelFormat::Yuyv4 => Ok(FourCC::new(b"YUYV")),
        PixelFormat::Rgb24 => Ok(FourCC::new(b"RGB3")),
        PixelFormat::Gray8 => Ok(FourCC::new(b"GREY")),
        PixelFormat::Nv12 => Ok(FourCC::new(b"NV12")),
        PixelFormat::Nv21 => Ok(FourCC::new(b"NV21")),
        other => Err(CaptureError::UnsupportedFormat(other.to_string())),
    }
}

impl V4l2Capture {
    /// Open the configured device and negotiate the frame format. The
    /// driver may adjust the size; the adjusted size is what `format()`
    /// reports.
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        if !Path::new(&config.device).exists() {
            return Err(CaptureError::DeviceNotFound(config.device.clone()));
        }
        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::DeviceNotFound(format!(
                "{} has no video capture capability",
                config.device
            )));
        }

        let wanted = fourcc(config.format)?;
        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = wanted;
        let fmt = device.set_format(&fmt)?;

        if fmt.fourcc != wanted {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} refused {}, offered {}",
                config.device, config.format, fmt.fourcc
            )));
        }
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                "Driver adjusted size {}x{} -> {}x{}",
                config.width, config.height, fmt.width, fmt.height
            );
        }

        let format = StreamFormat::new(fmt.width, fmt.height, config.format);
        format.frame_len()?;

        let min_stride = config
            .format
            .min_stride(fmt.width)
            .ok_or_else(|| CaptureError::UnsupportedFormat(format!("{} too wide", format)))?;
        // some drivers leave bytesperline unset for tightly packed buffers
        let stride = match fmt.stride as usize {
            0 => min_stride,
            stride if stride < min_stride => {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "{} reports {} bytes per row for {}, need at least {}",
                    config.device, stride, format, min_stride
                )));
            }
            stride => stride,
        };
        if stride != min_stride {
            info!("Rows padded to {} bytes, stripping {} per row", stride, stride - min_stride);
        }

        Ok(Self {
            device,
            stream: None,
            format,
            stride,
            buffer_count: config.buffer_count,
            name: config.device.clone(),
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }
}

impl CaptureSource for V4l2Capture {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            self.start_stream()?;
        }
        let stream = self.stream.as_mut().ok_or(CaptureError::NotStarted)?;

        let (data, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(data.len());
        let used = if used == 0 { data.len() } else { used };

        self.format.copy_unpadded(&data[..used], self.stride, buf)?;
        Ok(())
    }
}

/// Find the first capture device offering `format` frames.
pub fn auto_detect_device(format: PixelFormat) -> Result<String, CaptureError> {
    let wanted = fourcc(format)?;
    info!("Auto-detecting {} capture devices...", format);

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|f| f.fourcc == wanted) {
                info!("Found {} device: {} - {}", format, path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(CaptureError::DeviceNotFound(format!(
        "no {} capture device in /dev/video0-9",
        format
    )))
}
