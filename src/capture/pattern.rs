//! Synthetic capture source: a diagonal gradient that scrolls one step per
//! frame. Stands in for a camera in the demo and in tests.

use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::capture::frame::{PixelFormat, StreamFormat};
use crate::capture::source::CaptureSource;
use crate::error::CaptureError;

pub struct TestPattern {
    stream: StreamFormat,
    frame_len: usize,
    interval: Option<Duration>,
    next_deadline: Option<Instant>,
    produced: u64,
}

impl TestPattern {
    /// `fps` of zero produces frames as fast as they are asked for.
    pub fn new(stream: StreamFormat, fps: u32) -> Result<Self, CaptureError> {
        let frame_len = stream.frame_len()?;
        let interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        Ok(Self {
            stream,
            frame_len,
            interval,
            next_deadline: None,
            produced: 0,
        })
    }

    /// Frames generated so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let deadline = *self.next_deadline.get_or_insert_with(Instant::now);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // advance from the deadline, not from wake-up, so sleep overshoot
        // does not accumulate
        self.next_deadline = Some(deadline + interval);
    }

    fn fill(&self, out: &mut [u8]) {
        let StreamFormat { width, height, format } = self.stream;
        let (w, h) = (width as usize, height as usize);
        let shift = self.produced as usize;
        let luma = |x: usize, y: usize| ((x + y + shift) & 0xFF) as u8;

        match format {
            PixelFormat::Rgba8 | PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let bpp = if format == PixelFormat::Rgba8 { 4 } else { 3 };
                for (i, px) in out.chunks_exact_mut(bpp).enumerate() {
                    let v = luma(i % w, i / w);
                    let (r, g, b) = (v, v / 2, 255 - v);
                    if format == PixelFormat::Bgr24 {
                        px[..3].copy_from_slice(&[b, g, r]);
                    } else {
                        px[..3].copy_from_slice(&[r, g, b]);
                    }
                    if bpp == 4 {
                        px[3] = 0xFF;
                    }
                }
            }
            PixelFormat::Gray8 => {
                for (i, px) in out.iter_mut().enumerate() {
                    *px = luma(i % w, i / w);
                }
            }
            PixelFormat::Yuyv4 => {
                // Y U Y V: even pixels carry U, odd pixels carry V
                for (i, px) in out.chunks_exact_mut(2).enumerate() {
                    px[0] = luma(i % w, i / w);
                    px[1] = 0x80;
                }
            }
            PixelFormat::Nv21 | PixelFormat::Nv12 => {
                let (y_plane, chroma) = out.split_at_mut(w * h);
                for (i, px) in y_plane.iter_mut().enumerate() {
                    *px = luma(i % w, i / w);
                }
                chroma.fill(0x80);
            }
        }
    }
}

impl CaptureSource for TestPattern {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn format(&self) -> StreamFormat {
        self.stream
    }

    fn next_frame(&mut self, buf: &mut BytesMut) -> Result<(), CaptureError> {
        self.pace();
        buf.clear();
        buf.resize(self.frame_len, 0);
        self.fill(buf);
        self.produced += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pattern: &mut TestPattern) -> BytesMut {
        let mut buf = BytesMut::new();
        pattern.next_frame(&mut buf).unwrap();
        buf
    }

    #[test]
    fn frames_have_the_stream_size() {
        for format in [
            PixelFormat::Rgba8,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv4,
            PixelFormat::Gray8,
            PixelFormat::Nv21,
            PixelFormat::Nv12,
        ] {
            let stream = StreamFormat::new(5, 3, format);
            let mut pattern = TestPattern::new(stream, 0).unwrap();
            assert_eq!(frame(&mut pattern).len(), stream.frame_len().unwrap(), "{format}");
        }
    }

    #[test]
    fn pattern_moves_between_frames() {
        let mut pattern = TestPattern::new(StreamFormat::new(4, 4, PixelFormat::Gray8), 0).unwrap();
        let first = frame(&mut pattern);
        let second = frame(&mut pattern);
        assert_eq!(first[0], 0);
        assert_eq!(second[0], 1);
        assert_eq!(pattern.produced(), 2);
    }

    #[test]
    fn rgba_alpha_is_opaque() {
        let mut pattern = TestPattern::new(StreamFormat::new(3, 2, PixelFormat::Rgba8), 0).unwrap();
        let buf = frame(&mut pattern);
        assert!(buf.chunks_exact(4).all(|px| px[3] == 0xFF));
    }

    #[test]
    fn paced_source_respects_frame_rate() {
        let mut pattern = TestPattern::new(StreamFormat::new(2, 2, PixelFormat::Gray8), 100).unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            frame(&mut pattern);
        }
        // first frame is immediate, the next three wait 10ms each
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pacing_survives_a_huge_frame_count() {
        let mut pattern = TestPattern::new(StreamFormat::new(2, 2, PixelFormat::Gray8), 100).unwrap();
        pattern.produced = u64::from(u32::MAX) + 10;
        frame(&mut pattern);
        let start = Instant::now();
        for _ in 0..3 {
            frame(&mut pattern);
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn zero_sized_stream_is_rejected() {
        assert!(TestPattern::new(StreamFormat::new(0, 0, PixelFormat::Gray8), 30).is_err());
    }
}
