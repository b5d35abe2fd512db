use thiserror::Error;

/// Frame handoff errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("handoff session is closed")]
    SessionClosed,
}

/// Capture source errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("capture stream not started")]
    NotStarted,

    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Handoff(#[from] HandoffError),
}

/// Render loop errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("transform changed frame size: expected {expected} bytes, got {actual}")]
    TransformSize { expected: usize, actual: usize },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("sink failed: {0}")]
    Sink(String),

    #[error("failed to spawn render thread: {0}")]
    Spawn(String),

    #[error("render thread panicked")]
    Panicked,
}
