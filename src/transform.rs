//! Seam for the cartoon image transform.
//!
//! The stylisation itself lives outside this crate. Implementations only
//! have to honour one contract: the output has exactly as many bytes as the
//! input frame.

use serde::{Deserialize, Serialize};

use crate::capture::frame::FrameView;
use crate::error::RenderError;

/// Style switches handed to the transform with every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartoonModes {
    /// Line drawing instead of painting.
    pub sketch: bool,
    /// Recolour skin to an alien tone.
    pub alien: bool,
    /// "Evil" character instead of a "good" one.
    pub evil: bool,
    /// Emit intermediate debug output.
    pub debug: bool,
}

pub trait FrameTransform: Send {
    /// Process `input` into `out`. `out` is cleared by the caller and must
    /// end up exactly `input.data.len()` bytes long.
    fn apply(
        &mut self,
        input: FrameView<'_>,
        modes: &CartoonModes,
        out: &mut Vec<u8>,
    ) -> Result<(), RenderError>;

    fn name(&self) -> &str {
        "transform"
    }
}

/// Copies frames through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl FrameTransform for Passthrough {
    fn apply(
        &mut self,
        input: FrameView<'_>,
        _modes: &CartoonModes,
        out: &mut Vec<u8>,
    ) -> Result<(), RenderError> {
        out.extend_from_slice(input.data);
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

impl<F> FrameTransform for F
where
    F: FnMut(FrameView<'_>, &CartoonModes, &mut Vec<u8>) -> Result<(), RenderError> + Send,
{
    fn apply(
        &mut self,
        input: FrameView<'_>,
        modes: &CartoonModes,
        out: &mut Vec<u8>,
    ) -> Result<(), RenderError> {
        self(input, modes, out)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
