//! Where processed frames go: the screen, and on request persistent storage.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, info};

use crate::capture::frame::{FrameMetadata, FrameView};
use crate::error::RenderError;

pub trait FrameSink: Send {
    /// Show a processed frame.
    fn present(&mut self, frame: FrameView<'_>) -> Result<(), RenderError>;

    /// Keep a processed frame the user asked to save.
    fn save(&mut self, frame: FrameView<'_>) -> Result<(), RenderError>;
}

/// Logs every frame through `tracing`. Used by the demo binary in place of
/// a real display.
#[derive(Debug, Default)]
pub struct LogSink {
    presented: u64,
}

impl FrameSink for LogSink {
    fn present(&mut self, frame: FrameView<'_>) -> Result<(), RenderError> {
        self.presented += 1;
        debug!(
            presented = self.presented,
            sequence = frame.meta.sequence,
            bytes = frame.data.len(),
            "present {}x{} {}",
            frame.meta.width,
            frame.meta.height,
            frame.meta.format
        );
        Ok(())
    }

    fn save(&mut self, frame: FrameView<'_>) -> Result<(), RenderError> {
        info!(
            "Snapshot of frame {} ({}x{} {}, {} bytes)",
            frame.meta.sequence,
            frame.meta.width,
            frame.meta.height,
            frame.meta.format,
            frame.data.len()
        );
        Ok(())
    }
}

/// A saved frame, detached from the render loop's buffers.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: FrameMetadata,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Recorded {
    presented: u64,
    last_presented: Option<Snapshot>,
    saved: Vec<Snapshot>,
}

/// Records frames in memory. Clones share the same record, so a caller can
/// keep one handle while the render loop owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.with(|r| r.presented)
    }

    pub fn last_presented(&self) -> Option<Snapshot> {
        self.with(|r| r.last_presented.clone())
    }

    pub fn saved(&self) -> Vec<Snapshot> {
        self.with(|r| r.saved.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut recorded)
    }
}

fn detach(frame: FrameView<'_>) -> Snapshot {
    Snapshot {
        meta: *frame.meta,
        data: Bytes::copy_from_slice(frame.data),
    }
}

impl FrameSink for MemorySink {
    fn present(&mut self, frame: FrameView<'_>) -> Result<(), RenderError> {
        let snapshot = detach(frame);
        self.with(|r| {
            r.presented += 1;
            r.last_presented = Some(snapshot);
        });
        Ok(())
    }

    fn save(&mut self, frame: FrameView<'_>) -> Result<(), RenderError> {
        let snapshot = detach(frame);
        self.with(|r| r.saved.push(snapshot));
        Ok(())
    }
}
