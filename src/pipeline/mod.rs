pub mod handoff;
pub mod latency;
pub mod render;

pub use handoff::{FrameHandoff, HandoffStats};
pub use latency::{LatencySummary, LatencyWindow};
pub use render::{RenderHandle, RenderLoop, RenderReport, RenderSettings};
