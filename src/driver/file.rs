//! Built-in driver that appends every packet to a text file.
//!
//! Useful for wiring checks and for recording the color stream without any
//! hardware. `driver_param` selects the file, defaulting to `atmo_data.out`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::color::Rgb;
use crate::error::DriverError;
use crate::parm::Parameters;

#[derive(Default)]
pub struct FileDriver {
    parm: Option<Parameters>,
    out: Option<BufWriter<File>>,
    id: u64,
}

impl crate::driver::OutputDriver for FileDriver {
    fn open(&mut self, parm: &mut Parameters) -> Result<(), DriverError> {
        let path = if parm.driver_param.is_empty() {
            "atmo_data.out"
        } else {
            parm.driver_param.as_str()
        };
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| DriverError::new(format!("{path}: {e}")))?;
        self.parm = Some(parm.clone());
        self.out = Some(BufWriter::new(file));
        self.id = 0;
        Ok(())
    }

    fn configure(&mut self, parm: &Parameters) -> Result<(), DriverError> {
        self.parm = Some(parm.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.out = None;
        Ok(())
    }

    fn output_colors(&mut self, colors: &[Rgb], _last: Option<&[Rgb]>) -> Result<(), DriverError> {
        let (parm, out) = match (&self.parm, &mut self.out) {
            (Some(p), Some(o)) => (p, o),
            _ => return Err(DriverError::new("file driver not opened")),
        };

        let (secs, msecs) = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() % 60, d.subsec_millis()),
            Err(_) => (0, 0),
        };

        let mut write = || -> std::io::Result<()> {
            writeln!(out, "{}: {secs:02}.{msecs:03} ---", self.id)?;
            for (channel, color) in parm.layout().channels().iter().zip(colors) {
                writeln!(
                    out,
                    "{:>13}: {:3} {:3} {:3}",
                    channel.to_string(),
                    color.r,
                    color.g,
                    color.b
                )?;
            }
            out.flush()
        };
        write().map_err(|e| DriverError::new(e.to_string()))?;

        self.id += 1;
        Ok(())
    }
}
