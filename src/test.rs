//! Unit test utilities.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::color::Rgb;
use crate::driver::{DriverRegistry, OutputDriver};
use crate::error::DriverError;
use crate::layout::ChannelLayout;
use crate::parm::Parameters;
use crate::pixelformat::PixelFormat;
use crate::source::{FrameInfo, FrameSource, GrabError, GrabRequest};

/// Builds an RGBA frame from a per-pixel color function.
pub fn frame_of(width: usize, height: usize, f: impl Fn(usize, usize) -> Rgb) -> Vec<u8> {
    let mut buf = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let c = f(x, y);
            buf.extend_from_slice(&[c.r, c.g, c.b, 255]);
        }
    }
    buf
}

/// Builds a single-color RGBA frame.
pub fn solid_frame(width: usize, height: usize, color: Rgb) -> Vec<u8> {
    frame_of(width, height, |_, _| color)
}

/// Shorthand constructors for the layouts the tests keep reaching for.
pub trait LayoutExt {
    fn top_only() -> ChannelLayout;
    fn center_only() -> ChannelLayout;
}

impl LayoutExt for ChannelLayout {
    fn top_only() -> ChannelLayout {
        ChannelLayout {
            top: 1,
            ..ChannelLayout::default()
        }
    }

    fn center_only() -> ChannelLayout {
        ChannelLayout {
            center: true,
            ..ChannelLayout::default()
        }
    }
}

/// Call log of a [`RecordingDriver`].
#[derive(Default)]
pub struct Recorder {
    pub sent: Vec<(Vec<Rgb>, Option<Vec<Rgb>>)>,
    pub opened: usize,
    pub closed: usize,
    pub fail_next_send: bool,
}

pub type RecorderHandle = Arc<Mutex<Recorder>>;

/// Driver that records every call for later inspection.
pub struct RecordingDriver(pub Arc<Mutex<Recorder>>);

impl OutputDriver for RecordingDriver {
    fn open(&mut self, _parm: &mut Parameters) -> Result<(), DriverError> {
        self.0.lock().unwrap().opened += 1;
        Ok(())
    }

    fn configure(&mut self, _parm: &Parameters) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.0.lock().unwrap().closed += 1;
        Ok(())
    }

    fn output_colors(&mut self, colors: &[Rgb], last: Option<&[Rgb]>) -> Result<(), DriverError> {
        let mut rec = self.0.lock().unwrap();
        if rec.fail_next_send {
            rec.fail_next_send = false;
            return Err(DriverError::new("device detached"));
        }
        rec.sent.push((colors.to_vec(), last.map(<[Rgb]>::to_vec)));
        Ok(())
    }
}

/// A registry with a `"recording"` driver plus a handle to its call log.
pub fn recording_registry() -> (DriverRegistry, Arc<Mutex<Recorder>>) {
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let mut registry = DriverRegistry::default();
    let r = recorder.clone();
    registry.register("recording", move || Box::new(RecordingDriver(r.clone())));
    (registry, recorder)
}

/// Frame source delivering solid frames of an externally adjustable color.
pub struct TestSource {
    color: Arc<Mutex<Rgb>>,
}

impl TestSource {
    pub fn new(color: Rgb) -> (Self, Arc<Mutex<Rgb>>) {
        let color = Arc::new(Mutex::new(color));
        (
            Self {
                color: color.clone(),
            },
            color,
        )
    }
}

impl FrameSource for TestSource {
    fn display_size(&mut self) -> Option<(u32, u32)> {
        Some((128, 72))
    }

    fn grab(&mut self, request: &GrabRequest, buf: &mut Vec<u8>) -> Result<FrameInfo, GrabError> {
        let c = *self.color.lock().unwrap();
        buf.clear();
        buf.reserve((request.width * request.height * 4) as usize);
        for _ in 0..request.width * request.height {
            buf.extend_from_slice(&[c.r, c.g, c.b, 255]);
        }
        Ok(FrameInfo {
            width: request.width,
            height: request.height,
            format: PixelFormat::Rgba,
        })
    }
}

/// Polls `cond` for up to five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
