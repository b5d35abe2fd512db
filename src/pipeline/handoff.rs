//! Single-slot, double-buffered frame exchange between a capture producer
//! and a render consumer.
//!
//! The producer copies each frame into the spare buffer while holding only
//! the producer-side lock, then swaps it with the consumer-visible buffer
//! under a second lock that guards nothing but the pointer and the ready
//! flag. Frames nobody took before the next swap are dropped: only the
//! latest one matters.
//!
//! Frames are handed out as `Arc<Frame>`. A spare buffer is overwritten in
//! place only when the handoff holds its sole reference; if the consumer is
//! still holding an older frame, the producer writes into a freshly
//! allocated buffer instead, so a reader can never observe a partial write.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use tracing::{debug, info, instrument};

use crate::capture::frame::{Frame, PixelFormat, StreamFormat};
use crate::error::HandoffError;

/// Handle to one capture session's frame slot. Clones share the session.
#[derive(Clone)]
pub struct FrameHandoff {
    shared: Arc<Shared>,
}

struct Shared {
    stream: StreamFormat,
    frame_len: usize,
    closed: AtomicBool,
    /// Producer side. Held for the whole copy.
    back: Mutex<Back>,
    /// Consumer-visible side. Held only for the swap or the take.
    front: Mutex<Option<Front>>,
    stats: CachePadded<Counters>,
}

struct Back {
    spare: Option<Arc<Frame>>,
    sequence: u64,
}

struct Front {
    current: Arc<Frame>,
    ready: bool,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    taken: AtomicU64,
    dropped: AtomicU64,
    size_mismatches: AtomicU64,
    reallocations: AtomicU64,
}

/// Point-in-time copy of the handoff counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub published: u64,
    pub taken: u64,
    /// Published frames replaced before the consumer took them.
    pub dropped: u64,
    pub size_mismatches: u64,
    /// Publishes that could not reuse the spare buffer because the
    /// consumer still held it.
    pub reallocations: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Neither critical section can leave the state half-updated, so a
    // poisoned lock is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameHandoff {
    /// Start a session for `width` x `height` frames in `format`, allocating
    /// both buffers up front.
    pub fn start(width: u32, height: u32, format: PixelFormat) -> Result<Self, HandoffError> {
        Self::with_format(StreamFormat::new(width, height, format))
    }

    #[instrument]
    pub fn with_format(stream: StreamFormat) -> Result<Self, HandoffError> {
        let frame_len = stream.frame_len()?;

        let shared = Shared {
            stream,
            frame_len,
            closed: AtomicBool::new(false),
            back: Mutex::new(Back {
                spare: Some(Arc::new(Frame::blank(stream, frame_len))),
                sequence: 0,
            }),
            front: Mutex::new(Some(Front {
                current: Arc::new(Frame::blank(stream, frame_len)),
                ready: false,
            })),
            stats: CachePadded::new(Counters::default()),
        };

        info!("Handoff session started: {} ({} bytes/frame)", stream, frame_len);
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Copy `bytes` into the spare buffer and make it the current frame.
    ///
    /// Never waits for the consumer. Returns the sequence number assigned to
    /// the frame. A wrongly sized frame is rejected without touching either
    /// buffer.
    pub fn publish(&self, bytes: &[u8]) -> Result<u64, HandoffError> {
        let shared = &*self.shared;

        if shared.closed.load(Ordering::Acquire) {
            return Err(HandoffError::SessionClosed);
        }
        if bytes.len() != shared.frame_len {
            shared.stats.size_mismatches.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("handoff_size_mismatches").increment(1);
            return Err(HandoffError::SizeMismatch {
                expected: shared.frame_len,
                actual: bytes.len(),
            });
        }

        let mut back = lock(&shared.back);
        let spare = back.spare.take().ok_or(HandoffError::SessionClosed)?;

        let mut frame = match Arc::try_unwrap(spare) {
            Ok(frame) => frame,
            Err(_held) => {
                // The consumer kept an older frame past its window
                shared.stats.reallocations.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("handoff_reallocations").increment(1);
                debug!("Spare buffer still referenced, allocating a new one");
                Frame::blank(shared.stream, shared.frame_len)
            }
        };

        back.sequence += 1;
        let sequence = back.sequence;
        frame.overwrite(bytes, sequence);
        let fresh = Arc::new(frame);

        let (previous, superseded) = {
            let mut front = lock(&shared.front);
            // stop() ran while we were copying; the frame is discarded
            let front = front.as_mut().ok_or(HandoffError::SessionClosed)?;
            let previous = std::mem::replace(&mut front.current, fresh);
            let superseded = std::mem::replace(&mut front.ready, true);
            (previous, superseded)
        };
        back.spare = Some(previous);
        drop(back);

        shared.stats.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("handoff_frames_published").increment(1);
        if superseded {
            shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("handoff_frames_dropped").increment(1);
        }

        Ok(sequence)
    }

    /// Take the current frame if one was published since the last take.
    /// Returns `Ok(None)` immediately otherwise.
    ///
    /// The frame should be released before the next call; holding it longer
    /// forces the producer to allocate.
    pub fn try_take(&self) -> Result<Option<Arc<Frame>>, HandoffError> {
        let frame = {
            let mut front = lock(&self.shared.front);
            let front = front.as_mut().ok_or(HandoffError::SessionClosed)?;
            if !front.ready {
                return Ok(None);
            }
            front.ready = false;
            Arc::clone(&front.current)
        };

        self.shared.stats.taken.fetch_add(1, Ordering::Relaxed);
        Ok(Some(frame))
    }

    /// Release both buffers. Later `publish` and `try_take` calls fail with
    /// `SessionClosed`. Safe to call more than once and from any thread.
    pub fn stop(&self) {
        let shared = &*self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Never hold both locks here: publish takes them back-then-front.
        let current = lock(&shared.front).take();
        // None when a publish caught mid-copy holds the spare; it drops it
        // when the swap fails
        let spare = lock(&shared.back).spare.take();
        drop((current, spare));

        info!("Handoff session stopped: {:?}", self.stats());
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.stream
    }

    /// Exact byte length `publish` expects.
    pub fn frame_len(&self) -> usize {
        self.shared.frame_len
    }

    pub fn stats(&self) -> HandoffStats {
        let c = &self.shared.stats;
        HandoffStats {
            published: c.published.load(Ordering::Relaxed),
            taken: c.taken.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            size_mismatches: c.size_mismatches.load(Ordering::Relaxed),
            reallocations: c.reallocations.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for FrameHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandoff")
            .field("stream", &self.shared.stream)
            .field("frame_len", &self.shared.frame_len)
            .field("closed", &self.is_closed())
            .finish()
    }
}
