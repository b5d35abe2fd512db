use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use cartoonifier::capture::{
    CaptureDriver, CaptureSource, DriverSettings, FrameView, PixelFormat, StreamFormat, TestPattern,
};
use cartoonifier::error::{CaptureError, RenderError};
use cartoonifier::pipeline::{FrameHandoff, RenderLoop, RenderSettings};
use cartoonifier::sink::MemorySink;
use cartoonifier::transform::{CartoonModes, Passthrough};

fn settings() -> RenderSettings {
    RenderSettings {
        poll_interval: Duration::from_millis(1),
        freeze_after_save: Duration::ZERO,
        ..RenderSettings::default()
    }
}

/// Poll `cond` until it holds or a generous timeout passes.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_pattern_reaches_the_sink() {
    let stream = StreamFormat::new(16, 8, PixelFormat::Nv21);
    let handoff = FrameHandoff::with_format(stream).unwrap();
    let sink = MemorySink::new();

    let capture = CaptureDriver::spawn(TestPattern::new(stream, 200).unwrap(), handoff.clone()).unwrap();
    let render = RenderLoop::spawn(handoff.clone(), Passthrough, sink.clone(), settings()).unwrap();

    assert!(wait_for(|| sink.presented() >= 5));

    handoff.stop();
    let capture_report = capture.stop();
    let render_report = render.stop().unwrap();

    assert!(capture_report.failure.is_none());
    assert!(capture_report.frames_published >= 5);
    assert_eq!(render_report.frames_rendered, sink.presented());
    assert_eq!(render_report.errors, 0);
    assert!(render_report.latency.samples > 0);

    let last = sink.last_presented().unwrap();
    assert_eq!(last.data.len(), stream.frame_len().unwrap());
    assert_eq!(last.meta.width, 16);
    assert_eq!(last.meta.format, PixelFormat::Nv21);
}

#[test]
fn render_loop_exits_when_session_closes() {
    let handoff = FrameHandoff::start(4, 4, PixelFormat::Gray8).unwrap();
    let render = RenderLoop::spawn(handoff.clone(), Passthrough, MemorySink::new(), settings()).unwrap();

    handoff.stop();
    assert!(wait_for(|| render.is_finished()));
    assert_eq!(render.stop().unwrap().frames_rendered, 0);
}

#[test]
fn snapshot_saves_the_transformed_frame_and_freezes() {
    let handoff = FrameHandoff::start(2, 2, PixelFormat::Gray8).unwrap();
    let sink = MemorySink::new();
    let invert = |input: FrameView<'_>, _modes: &CartoonModes, out: &mut Vec<u8>| -> Result<(), RenderError> {
        out.extend(input.data.iter().map(|b| !b));
        Ok(())
    };
    let render = RenderLoop::spawn(
        handoff.clone(),
        invert,
        sink.clone(),
        RenderSettings {
            freeze_after_save: Duration::from_secs(60),
            ..settings()
        },
    )
    .unwrap();

    render.request_snapshot();
    handoff.publish(&[0x0F; 4]).unwrap();
    assert!(wait_for(|| !sink.saved().is_empty()));

    let saved = sink.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(&saved[0].data[..], &[0xF0; 4]);
    assert_eq!(saved[0].meta.sequence, 1);

    // frozen: a new frame stays in the slot
    handoff.publish(&[0x00; 4]).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.presented(), 1);
    assert_eq!(handoff.stats().taken, 1);

    let report = render.stop().unwrap();
    assert_eq!(report.snapshots, 1);
    assert_eq!(report.frames_rendered, 1);
}

#[test]
fn wrong_sized_transform_output_is_rejected() {
    let handoff = FrameHandoff::start(2, 2, PixelFormat::Gray8).unwrap();
    let sink = MemorySink::new();
    let shrink = |_input: FrameView<'_>, _modes: &CartoonModes, out: &mut Vec<u8>| -> Result<(), RenderError> {
        out.push(0);
        Ok(())
    };
    let render = RenderLoop::spawn(handoff.clone(), shrink, sink.clone(), settings()).unwrap();

    handoff.publish(&[1; 4]).unwrap();
    assert!(wait_for(|| handoff.stats().taken == 1));
    let report = render.stop().unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.frames_rendered, 0);
    assert_eq!(sink.presented(), 0);
}

#[test]
fn modes_reach_the_transform() {
    let handoff = FrameHandoff::start(1, 1, PixelFormat::Gray8).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = {
        let seen = Arc::clone(&seen);
        move |input: FrameView<'_>, modes: &CartoonModes, out: &mut Vec<u8>| -> Result<(), RenderError> {
            seen.lock().unwrap().push(*modes);
            out.extend_from_slice(input.data);
            Ok(())
        }
    };
    let render = RenderLoop::spawn(handoff.clone(), record, MemorySink::new(), settings()).unwrap();

    handoff.publish(&[0]).unwrap();
    assert!(wait_for(|| seen.lock().unwrap().len() == 1));

    let sketch = CartoonModes {
        sketch: true,
        evil: true,
        ..CartoonModes::default()
    };
    render.set_modes(sketch);
    assert_eq!(render.modes(), sketch);
    handoff.publish(&[1]).unwrap();
    assert!(wait_for(|| seen.lock().unwrap().len() == 2));
    render.stop().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], CartoonModes::default());
    assert_eq!(seen[1], sketch);
}

/// Fails a fixed number of times, then delivers frames of the wrong size.
struct Flaky {
    stream: StreamFormat,
    failures_left: u32,
}

impl CaptureSource for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn format(&self) -> StreamFormat {
        self.stream
    }

    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError> {
        thread::sleep(Duration::from_millis(1));
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(CaptureError::NotStarted);
        }
        buf.clear();
        buf.extend_from_slice(&[0u8; 3]);
        Ok(())
    }
}

#[test]
fn driver_survives_errors_and_rejects_bad_frames() {
    let stream = StreamFormat::new(2, 2, PixelFormat::Gray8);
    let handoff = FrameHandoff::with_format(stream).unwrap();
    let capture = CaptureDriver::spawn_with(
        Flaky {
            stream,
            failures_left: 3,
        },
        handoff.clone(),
        DriverSettings {
            max_consecutive_errors: 5,
            error_backoff: Duration::from_millis(1),
        },
    )
    .unwrap();

    assert!(wait_for(|| handoff.stats().size_mismatches >= 2));
    let report = capture.stop();

    assert_eq!(report.source_errors, 3);
    assert!(report.failure.is_none());
    assert!(report.frames_rejected >= 2);
    assert_eq!(report.frames_published, 0);
    assert!(handoff.try_take().unwrap().is_none());
}

#[test]
fn driver_gives_up_after_too_many_errors() {
    let stream = StreamFormat::new(2, 2, PixelFormat::Gray8);
    let handoff = FrameHandoff::with_format(stream).unwrap();
    let capture = CaptureDriver::spawn_with(
        Flaky {
            stream,
            failures_left: u32::MAX,
        },
        handoff,
        DriverSettings {
            max_consecutive_errors: 3,
            error_backoff: Duration::from_millis(1),
        },
    )
    .unwrap();

    assert!(wait_for(|| capture.is_finished()));
    let report = capture.stop();
    assert_eq!(report.source_errors, 3);
    assert!(matches!(report.failure, Some(CaptureError::NotStarted)));
}

/// A camera whose rows carry two bytes of padding, delivering every other
/// buffer cut short.
struct Padded {
    stream: StreamFormat,
    delivered: u32,
}

const PADDED_STRIDE: usize = 8;

impl CaptureSource for Padded {
    fn name(&self) -> &str {
        "padded"
    }

    fn format(&self) -> StreamFormat {
        self.stream
    }

    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError> {
        thread::sleep(Duration::from_millis(1));
        self.delivered += 1;
        let mut raw = Vec::new();
        for row in 0..2u8 {
            raw.extend((1..=6).map(|b| row * 6 + b));
            raw.extend([0xEE; 2]);
        }
        if self.delivered % 2 == 0 {
            raw.truncate(12);
        }
        self.stream.copy_unpadded(&raw, PADDED_STRIDE, buf)?;
        Ok(())
    }
}

#[test]
fn padded_rows_are_stripped_and_short_buffers_dropped() {
    let stream = StreamFormat::new(3, 2, PixelFormat::Yuyv4);
    let handoff = FrameHandoff::with_format(stream).unwrap();
    let capture = CaptureDriver::spawn(Padded { stream, delivered: 0 }, handoff.clone()).unwrap();

    assert!(wait_for(|| handoff.stats().published >= 3));
    let report = capture.stop();

    assert!(report.failure.is_none());
    assert_eq!(report.source_errors, 0);
    assert!(report.frames_rejected >= 2);
    assert_eq!(handoff.stats().size_mismatches, 0);

    let frame = handoff.try_take().unwrap().unwrap();
    assert_eq!(frame.data(), (1..=12).collect::<Vec<u8>>().as_slice());
}
