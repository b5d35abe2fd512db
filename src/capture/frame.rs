use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::error::HandoffError;

/// One captured image. Dimensions and format are fixed at allocation;
/// only the pixel bytes and publication metadata change between uses.
pub struct Frame {
    data: Box<[u8]>,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Publication sequence within a session, starting at 1. Zero means
    /// the buffer has never been published.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support. All of them have a fixed size per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Gray8,
    /// YUV 4:2:0, Y plane followed by interleaved VU. Android preview default.
    Nv21,
    /// YUV 4:2:0, Y plane followed by interleaved UV.
    Nv12,
}

impl PixelFormat {
    /// Byte size of one `width` x `height` frame, or `None` on overflow.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let pixels = w.checked_mul(h)?;
        match self {
            PixelFormat::Rgba8 => pixels.checked_mul(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Yuyv4 => pixels.checked_mul(2),
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Nv21 | PixelFormat::Nv12 => {
                // chroma is subsampled 2x2, rounding up on odd edges
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?.checked_mul(2)?;
                pixels.checked_add(chroma)
            }
        }
    }

    /// `(rows, bytes per row)` of each plane, without padding. Packed
    /// formats have an empty second plane.
    fn planes(self, width: u32, height: u32) -> Option<[(usize, usize); 2]> {
        let w = width as usize;
        let h = height as usize;
        let luma = |bpp: usize| Some([(h, w.checked_mul(bpp)?), (0, 0)]);
        match self {
            PixelFormat::Rgba8 => luma(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => luma(3),
            PixelFormat::Yuyv4 => luma(2),
            PixelFormat::Gray8 => luma(1),
            PixelFormat::Nv21 | PixelFormat::Nv12 => {
                Some([(h, w), (h.div_ceil(2), w.div_ceil(2).checked_mul(2)?)])
            }
        }
    }

    /// Smallest row pitch a device buffer can use for `width` pixels.
    pub fn min_stride(self, width: u32) -> Option<usize> {
        let [(_, luma), (_, chroma)] = self.planes(width, 1)?;
        Some(luma.max(chroma))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba8 => "RGBA",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Yuyv4 => "YUYV",
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Nv12 => "NV12",
        };
        f.write_str(name)
    }
}

/// Geometry and encoding of a capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl StreamFormat {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Expected byte size of one frame in this stream.
    pub fn frame_len(&self) -> Result<usize, HandoffError> {
        if self.width == 0 || self.height == 0 {
            return Err(HandoffError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        self.format
            .frame_len(self.width, self.height)
            .ok_or(HandoffError::InvalidDimensions {
                width: self.width,
                height: self.height,
            })
    }

    /// Copy a device buffer whose rows are `stride` bytes apart into `out`,
    /// dropping the row padding. Planes follow each other at `rows * stride`.
    ///
    /// A buffer too short for that layout is a `SizeMismatch` and leaves
    /// `out` empty. Bytes past the last row are ignored.
    pub fn copy_unpadded(
        &self,
        src: &[u8],
        stride: usize,
        out: &mut BytesMut,
    ) -> Result<(), HandoffError> {
        let expected = self.frame_len()?;
        let planes = self
            .format
            .planes(self.width, self.height)
            .ok_or(HandoffError::InvalidDimensions {
                width: self.width,
                height: self.height,
            })?;
        out.clear();

        let mut needed = 0;
        let mut offset = 0;
        for &(rows, row_len) in planes.iter().filter(|(rows, _)| *rows > 0) {
            if stride < row_len {
                needed = usize::MAX;
                break;
            }
            needed = offset + (rows - 1) * stride + row_len;
            offset += rows * stride;
        }
        if src.len() < needed {
            return Err(HandoffError::SizeMismatch {
                expected: needed,
                actual: src.len(),
            });
        }

        out.reserve(expected);
        let mut offset = 0;
        for &(rows, row_len) in &planes {
            for row in 0..rows {
                let start = offset + row * stride;
                out.extend_from_slice(&src[start..start + row_len]);
            }
            offset += rows * stride;
        }
        debug_assert_eq!(out.len(), expected);
        Ok(())
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

/// Borrowed view of pixel data with its metadata. Used for transform
/// outputs that never live in a handoff buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub meta: &'a FrameMetadata,
    pub data: &'a [u8],
    pub timestamp: Instant,
}

impl Frame {
    /// Zero-filled, never-published frame.
    pub(crate) fn blank(stream: StreamFormat, len: usize) -> Self {
        Self {
            data: vec![0u8; len].into_boxed_slice(),
            meta: FrameMetadata {
                sequence: 0,
                width: stream.width,
                height: stream.height,
                format: stream.format,
            },
            timestamp: Instant::now(),
        }
    }

    /// Overwrite contents in place. `bytes` must already be the right length.
    pub(crate) fn overwrite(&mut self, bytes: &[u8], sequence: u64) {
        self.data.copy_from_slice(bytes);
        self.meta.sequence = sequence;
        self.timestamp = Instant::now();
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.meta.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.meta.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            meta: &self.meta,
            data: &self.data,
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}
