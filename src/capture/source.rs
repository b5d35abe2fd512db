//! Producer side: capture sources and the thread that feeds them into a
//! handoff session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, error, info, info_span, warn};

use crate::capture::frame::StreamFormat;
use crate::error::{CaptureError, HandoffError};
use crate::pipeline::handoff::FrameHandoff;

/// A device (or stand-in) that delivers raw frames at its own pace.
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    /// Geometry of the frames this source will deliver.
    fn format(&self) -> StreamFormat;

    /// Block until the next frame is available and write it into `buf`,
    /// replacing its contents.
    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError> {
        (**self).next_frame(buf)
    }
}

/// Driver tuning
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Give up after this many source errors in a row.
    pub max_consecutive_errors: u32,
    /// Pause after a source error before asking again.
    pub error_backoff: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 10,
            error_backoff: Duration::from_millis(10),
        }
    }
}

/// What the capture thread did over its lifetime.
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub frames_published: u64,
    pub frames_rejected: u64,
    pub source_errors: u64,
    /// Set when the driver gave up on the source.
    pub failure: Option<CaptureError>,
}

/// Runs a [`CaptureSource`] on its own thread, publishing every frame.
pub struct CaptureDriver;

impl CaptureDriver {
    pub fn spawn<S>(source: S, handoff: FrameHandoff) -> Result<CaptureHandle, CaptureError>
    where
        S: CaptureSource + 'static,
    {
        Self::spawn_with(source, handoff, DriverSettings::default())
    }

    pub fn spawn_with<S>(
        source: S,
        handoff: FrameHandoff,
        settings: DriverSettings,
    ) -> Result<CaptureHandle, CaptureError>
    where
        S: CaptureSource + 'static,
    {
        if source.format() != handoff.format() {
            warn!(
                "Source {} delivers {} but the session expects {}",
                source.name(),
                source.format(),
                handoff.format()
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("capture-{}", source.name()))
                .spawn(move || run_capture(source, handoff, settings, running))
                .map_err(|e| CaptureError::Spawn(e.to_string()))?
        };

        Ok(CaptureHandle {
            running,
            thread: Some(thread),
        })
    }
}

fn run_capture<S: CaptureSource>(
    mut source: S,
    handoff: FrameHandoff,
    settings: DriverSettings,
    running: Arc<AtomicBool>,
) -> CaptureReport {
    let span = info_span!("capture", source = source.name());
    let _enter = span.enter();
    info!("Capture thread started: {}", source.format());

    let mut report = CaptureReport::default();
    let mut buf = BytesMut::with_capacity(handoff.frame_len());
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::Acquire) {
        match source.next_frame(&mut buf) {
            Ok(()) => {}
            // a malformed frame is dropped like one the handoff rejects
            Err(CaptureError::Handoff(e @ HandoffError::SizeMismatch { .. })) => {
                report.frames_rejected += 1;
                consecutive_errors = 0;
                metrics::counter!("capture_frames_rejected").increment(1);
                warn!("Dropped frame: {}", e);
                continue;
            }
            Err(e) => {
                report.source_errors += 1;
                consecutive_errors += 1;
                metrics::counter!("capture_errors").increment(1);
                if consecutive_errors >= settings.max_consecutive_errors {
                    error!("Giving up after {} capture errors: {}", consecutive_errors, e);
                    report.failure = Some(e);
                    break;
                }
                warn!("Capture error: {}", e);
                thread::sleep(settings.error_backoff);
                continue;
            }
        }
        consecutive_errors = 0;

        match handoff.publish(&buf) {
            Ok(sequence) => {
                report.frames_published += 1;
                if sequence % 300 == 0 {
                    debug!("Published frame {}", sequence);
                }
            }
            Err(HandoffError::SessionClosed) => {
                info!("Handoff session closed");
                break;
            }
            Err(e) => {
                report.frames_rejected += 1;
                warn!("Dropped frame: {}", e);
            }
        }
    }

    info!(
        "Capture thread exiting: {} published, {} rejected, {} errors",
        report.frames_published, report.frames_rejected, report.source_errors
    );
    report
}

/// Control handle for a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<CaptureReport>>,
}

impl CaptureHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Ask the thread to exit after its current frame and wait for it.
    pub fn stop(mut self) -> CaptureReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> CaptureReport {
        self.running.store(false, Ordering::Release);
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                error!("Capture thread panicked");
                CaptureReport::default()
            }
            None => CaptureReport::default(),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}
