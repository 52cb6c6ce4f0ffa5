//! Runs the pipeline against a synthetic frame source and dumps the color
//! stream through the built-in file driver.
//!
//!     cargo run --example filedump -- [output-file]

use std::time::{Duration, Instant};

use anyhow::bail;
use atmoglow::{
    DriverRegistry, FrameInfo, FrameSource, GrabError, GrabRequest, ParmValue, Pipeline,
    PixelFormat,
};

/// Fades through the hue circle, brightest in the frame center.
struct PlasmaSource {
    started: Instant,
}

impl FrameSource for PlasmaSource {
    fn display_size(&mut self) -> Option<(u32, u32)> {
        Some((1280, 720))
    }

    fn grab(&mut self, request: &GrabRequest, buf: &mut Vec<u8>) -> Result<FrameInfo, GrabError> {
        let t = self.started.elapsed().as_secs_f64();
        let (w, h) = (request.width, request.height);

        buf.clear();
        buf.reserve((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let fx = f64::from(x) / f64::from(w);
                let fy = f64::from(y) / f64::from(h);
                let r = ((fx * 6.0 + t).sin() * 0.5 + 0.5) * 255.0;
                let g = ((fy * 4.0 + t * 0.7).sin() * 0.5 + 0.5) * 255.0;
                let b = ((t * 0.3).sin() * 0.5 + 0.5) * 255.0;
                buf.extend_from_slice(&[r as u8, g as u8, b as u8, 255]);
            }
        }
        Ok(FrameInfo {
            width: w,
            height: h,
            format: PixelFormat::Rgba,
        })
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Debug)
        .init();

    let out = std::env::args().nth(1).unwrap_or_else(|| "atmo_data.out".into());

    let source = PlasmaSource {
        started: Instant::now(),
    };
    let mut pipeline = Pipeline::new(Box::new(source), DriverRegistry::default());
    pipeline.set_parm("driver", ParmValue::Str("file".into()))?;
    pipeline.set_parm("driver_param", ParmValue::Str(out.clone()))?;
    pipeline.set_parm("top", ParmValue::Int(4))?;
    pipeline.set_parm("bottom", ParmValue::Int(4))?;
    pipeline.set_parm("left", ParmValue::Int(2))?;
    pipeline.set_parm("right", ParmValue::Int(2))?;
    pipeline.set_parm("start_delay", ParmValue::Int(0))?;
    if pipeline.get_parm("driver") != Some(ParmValue::Str("file".into())) {
        bail!("parameter surface out of sync");
    }

    pipeline.reconfigure()?;
    println!("pipeline running, dumping two seconds of colors to {out}");
    std::thread::sleep(Duration::from_secs(2));

    pipeline.suspend();
    println!("suspended (lights off), resuming once more");
    std::thread::sleep(Duration::from_millis(200));
    pipeline.resume();
    std::thread::sleep(Duration::from_millis(500));

    pipeline.stop();
    println!("done; see {out}");
    Ok(())
}
