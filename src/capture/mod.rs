pub mod frame;
pub mod pattern;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, FrameView, PixelFormat, StreamFormat};
pub use pattern::TestPattern;
pub use source::{CaptureDriver, CaptureHandle, CaptureReport, CaptureSource, DriverSettings};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
