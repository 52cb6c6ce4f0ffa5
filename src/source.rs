//! The frame source abstraction.
//!
//! Something outside this crate produces pixels: a video player hook, a
//! screen grabber, a test harness. The pipeline only needs the current
//! display size and a way to grab a scaled frame at a request cadence.

use std::fmt;
use std::time::Duration;

use crate::pixelformat::PixelFormat;

/// How long the grab loop waits for a frame before skipping the iteration.
pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(100);

bitflags::bitflags! {
    /// Hints for how a source should satisfy a grab.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct GrabFlags: u32 {
        /// The source should keep its capture path alive between grabs.
        const CONTINUOUS = 1 << 0;
        /// Wait for the next displayed frame instead of re-delivering the
        /// current one.
        const WAIT_NEXT = 1 << 1;
    }
}

/// One grab request issued by the pipeline.
#[derive(Clone, Copy, Debug)]
pub struct GrabRequest {
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    pub timeout: Duration,
    pub flags: GrabFlags,
}

/// Shape of a delivered frame. The source may deliver dimensions other than
/// the requested ones; the pipeline skips such frames.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Transient grab failure. Both variants skip the current iteration; neither
/// stops the pipeline.
#[derive(Debug)]
pub enum GrabError {
    /// No frame arrived within [`GrabRequest::timeout`].
    Timeout,
    Failed(String),
}

impl fmt::Display for GrabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("grab timed out"),
            Self::Failed(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for GrabError {}

/// A producer of RGBA/BGRA frames.
pub trait FrameSource: Send {
    /// Size of the display the source captures, if currently known.
    fn display_size(&mut self) -> Option<(u32, u32)>;

    /// Grabs one frame scaled to the requested size into `buf` and reports
    /// the delivered shape. `buf` is reused across calls.
    fn grab(&mut self, request: &GrabRequest, buf: &mut Vec<u8>) -> Result<FrameInfo, GrabError>;

    /// Called when the pipeline suspends or parks; the source should drop
    /// expensive capture state until the next grab.
    fn release(&mut self) {}
}
