//! Consumer side: a dedicated thread that polls the handoff, runs the
//! transform and hands the result to a sink.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, info_span, warn};

use crate::capture::frame::{Frame, FrameView};
use crate::error::{HandoffError, RenderError};
use crate::pipeline::handoff::FrameHandoff;
use crate::pipeline::latency::{LatencySummary, LatencyWindow};
use crate::sink::FrameSink;
use crate::transform::{CartoonModes, FrameTransform};
use crate::Config;

/// Render loop tuning
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Sleep between polls when no new frame is ready.
    pub poll_interval: Duration,
    /// How long a saved snapshot stays on screen before live frames resume.
    pub freeze_after_save: Duration,
    /// Pin the render thread to this CPU core.
    pub pin_core: Option<usize>,
    pub modes: CartoonModes,
    pub latency_window: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            freeze_after_save: Duration::from_millis(3000),
            pin_core: None,
            modes: CartoonModes::default(),
            latency_window: 256,
        }
    }
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.pipeline.poll_interval_ms),
            freeze_after_save: Duration::from_millis(config.pipeline.freeze_output_ms),
            pin_core: config.pipeline.pin_render_core,
            modes: config.cartoon,
            latency_window: config.pipeline.latency_window,
        }
    }
}

/// What the render thread did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderReport {
    pub frames_rendered: u64,
    pub snapshots: u64,
    pub errors: u64,
    pub latency: LatencySummary,
}

enum Command {
    Snapshot,
    Shutdown,
}

/// Control handle for a running render thread.
pub struct RenderHandle {
    commands: Sender<Command>,
    modes: Arc<ArcSwap<CartoonModes>>,
    thread: Option<JoinHandle<RenderReport>>,
}

impl RenderHandle {
    /// Transform the next frame, present it, save it, then freeze the
    /// output for the configured period.
    pub fn request_snapshot(&self) {
        if self.commands.send(Command::Snapshot).is_err() {
            warn!("Render loop already exited, snapshot request ignored");
        }
    }

    /// Swap the style switches used from the next frame on.
    pub fn set_modes(&self, modes: CartoonModes) {
        self.modes.store(Arc::new(modes));
    }

    pub fn modes(&self) -> CartoonModes {
        **self.modes.load()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Ask the thread to exit and wait for it.
    pub fn stop(mut self) -> Result<RenderReport, RenderError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<RenderReport, RenderError> {
        // The thread may have exited on its own already
        let _ = self.commands.send(Command::Shutdown);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RenderError::Panicked),
            None => Ok(RenderReport::default()),
        }
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.shutdown() {
                error!("Render thread ended badly: {}", e);
            }
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Render thread state. Built and moved onto its thread by [`RenderLoop::spawn`].
pub struct RenderLoop<T, S> {
    handoff: FrameHandoff,
    transform: T,
    sink: S,
    settings: RenderSettings,
    modes: Arc<ArcSwap<CartoonModes>>,
    commands: Receiver<Command>,
    scratch: Vec<u8>,
    latency: LatencyWindow,
    report: RenderReport,
    pending_save: bool,
    frozen_until: Option<Instant>,
}

impl<T, S> RenderLoop<T, S>
where
    T: FrameTransform + 'static,
    S: FrameSink + 'static,
{
    pub fn spawn(
        handoff: FrameHandoff,
        transform: T,
        sink: S,
        settings: RenderSettings,
    ) -> Result<RenderHandle, RenderError> {
        let (tx, rx) = flume::unbounded();
        let modes = Arc::new(ArcSwap::from_pointee(settings.modes));

        let render = RenderLoop {
            scratch: Vec::with_capacity(handoff.frame_len()),
            latency: LatencyWindow::new(settings.latency_window),
            handoff,
            transform,
            sink,
            settings,
            modes: Arc::clone(&modes),
            commands: rx,
            report: RenderReport::default(),
            pending_save: false,
            frozen_until: None,
        };

        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || render.run())
            .map_err(|e| RenderError::Spawn(e.to_string()))?;

        Ok(RenderHandle {
            commands: tx,
            modes,
            thread: Some(thread),
        })
    }

    fn run(mut self) -> RenderReport {
        let span = info_span!("render", transform = self.transform.name());
        let _enter = span.enter();

        if let Some(core) = self.settings.pin_core {
            pin_to_core(core);
        }
        info!(
            "Render loop started: {} every {:?}",
            self.handoff.format(),
            self.settings.poll_interval
        );

        loop {
            if let Flow::Stop = self.drain_commands() {
                break;
            }

            if let Some(until) = self.frozen_until {
                let now = Instant::now();
                if now < until {
                    thread::sleep(self.settings.poll_interval.min(until - now));
                    continue;
                }
                self.frozen_until = None;
                debug!("Output unfrozen");
            }

            match self.handoff.try_take() {
                Ok(Some(frame)) => {
                    // a snapshot requested before this frame was published must apply to it
                    if let Flow::Stop = self.drain_commands() {
                        break;
                    }
                    self.render(&frame);
                }
                Ok(None) => thread::sleep(self.settings.poll_interval),
                Err(HandoffError::SessionClosed) => {
                    info!("Handoff session closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to take frame: {}", e);
                    self.report.errors += 1;
                    thread::sleep(self.settings.poll_interval);
                }
            }
        }

        self.report.latency = self.latency.summary();
        info!("Render loop exiting: {:?}", self.report);
        self.report
    }

    fn drain_commands(&mut self) -> Flow {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Snapshot) => {
                    debug!("Snapshot requested");
                    self.pending_save = true;
                }
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return Flow::Stop,
                Err(TryRecvError::Empty) => return Flow::Continue,
            }
        }
    }

    fn render(&mut self, frame: &Frame) {
        let modes = **self.modes.load();
        self.scratch.clear();

        let applied = self
            .transform
            .apply(frame.view(), &modes, &mut self.scratch)
            .and_then(|()| {
                if self.scratch.len() == frame.data().len() {
                    Ok(())
                } else {
                    Err(RenderError::TransformSize {
                        expected: frame.data().len(),
                        actual: self.scratch.len(),
                    })
                }
            });
        if let Err(e) = applied {
            warn!(sequence = frame.sequence(), "Transform failed: {}", e);
            self.report.errors += 1;
            metrics::counter!("render_errors").increment(1);
            return;
        }

        let output = FrameView {
            meta: &frame.meta,
            data: &self.scratch,
            timestamp: frame.timestamp,
        };

        if let Err(e) = self.sink.present(output) {
            warn!(sequence = frame.sequence(), "Present failed: {}", e);
            self.report.errors += 1;
            metrics::counter!("render_errors").increment(1);
        } else {
            self.report.frames_rendered += 1;
            let latency = frame.timestamp.elapsed();
            self.latency.record(latency);
            metrics::counter!("render_frames").increment(1);
            metrics::histogram!("frame_latency_ms").record(latency.as_secs_f64() * 1000.0);
        }

        if self.pending_save {
            self.pending_save = false;
            match self.sink.save(output) {
                Ok(()) => {
                    self.report.snapshots += 1;
                    info!("Saved frame {}", frame.sequence());
                    if !self.settings.freeze_after_save.is_zero() {
                        self.frozen_until = Some(Instant::now() + self.settings.freeze_after_save);
                    }
                }
                Err(e) => {
                    error!(sequence = frame.sequence(), "Save failed: {}", e);
                    self.report.errors += 1;
                }
            }
        }
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Cannot query CPU cores, render thread not pinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => info!("Render thread pinned to core {}", core),
        _ => warn!("Failed to pin render thread to core {}", core),
    }
}
