//! Output drivers and the host that feeds them.
//!
//! A driver transports per-channel colors to a device. Built-in drivers are
//! plain trait objects created through the [`DriverRegistry`]; everything
//! else is resolved by the dynamic loader in [`dynlib`].

pub mod dynlib;
mod file;

pub use file::FileDriver;

use crate::color::Rgb;
use crate::error::{DriverError, Error};
use crate::parm::Parameters;
use crate::Result;

/// One output back-end.
///
/// The driver is told the channel layout through the parameters passed to
/// [`OutputDriver::open`]; it may write refined values back (a controller
/// can impose its own zone counts). Errors carry a driver-supplied message.
pub trait OutputDriver: Send {
    /// Claims the device.
    fn open(&mut self, parm: &mut Parameters) -> Result<(), DriverError>;

    /// Applies instant-changeable settings on an open device.
    fn configure(&mut self, parm: &Parameters) -> Result<(), DriverError>;

    /// Releases the device.
    fn close(&mut self) -> Result<(), DriverError>;

    /// Transmits one frame of per-channel colors, in canonical channel
    /// order. `last` is `None` for the first packet after open, otherwise
    /// the previously transmitted frame for delta encoding.
    fn output_colors(&mut self, colors: &[Rgb], last: Option<&[Rgb]>) -> Result<(), DriverError>;
}

/// Discards everything. The reserved driver name `"null"` resolves to this
/// without touching the search path.
#[derive(Default)]
pub struct NullDriver;

impl OutputDriver for NullDriver {
    fn open(&mut self, _parm: &mut Parameters) -> Result<(), DriverError> {
        Ok(())
    }

    fn configure(&mut self, _parm: &Parameters) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn output_colors(&mut self, _colors: &[Rgb], _last: Option<&[Rgb]>) -> Result<(), DriverError> {
        Ok(())
    }
}

type DriverFactory = Box<dyn Fn() -> Box<dyn OutputDriver> + Send>;

/// Name-to-factory map for built-in drivers, with the dynamic loader as
/// fallback for unknown names.
pub struct DriverRegistry {
    builtin: Vec<(String, DriverFactory)>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self {
            builtin: Vec::new(),
        };
        registry.register("null", || Box::new(NullDriver));
        registry.register("file", || Box::new(FileDriver::default()));
        registry
    }
}

impl DriverRegistry {
    /// Registers a built-in driver under `name`, shadowing an earlier
    /// registration of the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn OutputDriver> + Send + 'static,
    ) {
        let name = name.into();
        self.builtin.retain(|(n, _)| *n != name);
        self.builtin.push((name, Box::new(factory)));
    }

    /// Creates the driver selected by `parm.driver`. An empty name selects
    /// the null driver; names without a built-in go through the dynamic
    /// loader using `parm.driver_path`.
    pub fn create(&self, parm: &Parameters) -> Result<Box<dyn OutputDriver>> {
        let name = if parm.driver.is_empty() {
            "null"
        } else {
            parm.driver.as_str()
        };
        if let Some((_, factory)) = self.builtin.iter().find(|(n, _)| n == name) {
            return Ok(factory());
        }
        dynlib::load(name, &parm.driver_path)
    }
}

/// Owns the active driver and performs the delta-suppressed send.
pub struct DriverHost {
    registry: DriverRegistry,
    driver: Option<Box<dyn OutputDriver>>,
    opened: bool,
    last_output: Vec<Rgb>,
}

impl DriverHost {
    pub fn new(registry: DriverRegistry) -> Self {
        Self {
            registry,
            driver: None,
            opened: false,
            last_output: Vec::new(),
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Resizes the per-channel state; the delta baseline restarts at black.
    pub fn configure_channels(&mut self, channels: usize) {
        self.last_output.clear();
        self.last_output.resize(channels, Rgb::BLACK);
    }

    /// Opens the driver, loading it first if necessary. On an already open
    /// driver this forwards the instant-changeable settings instead.
    pub fn open(&mut self, parm: &mut Parameters) -> Result<()> {
        if !self.opened {
            if self.driver.is_none() {
                self.driver = Some(self.registry.create(parm)?);
                log::info!("output driver {} loaded", parm.driver);
            }
            match self.driver.as_mut().unwrap().open(parm) {
                Ok(()) => {
                    self.opened = true;
                    log::info!("output driver opened");
                }
                Err(e) => {
                    log::error!("output driver error: {e}");
                    return Err(Error::from(e));
                }
            }
        } else {
            match self.driver.as_mut().unwrap().configure(parm) {
                Ok(()) => log::info!("output driver reconfigured"),
                Err(e) => {
                    log::error!("output driver error: {e}");
                    return Err(Error::from(e));
                }
            }
        }
        Ok(())
    }

    /// Turns the lights off and releases the device.
    pub fn close(&mut self) -> Result<()> {
        if self.opened {
            // Best effort; a failure here must not keep the device claimed.
            let _ = self.lights_off();
            self.opened = false;
            match self.driver.as_mut().unwrap().close() {
                Ok(()) => log::info!("output driver closed"),
                Err(e) => {
                    log::error!("output driver error: {e}");
                    return Err(Error::from(e));
                }
            }
        }
        Ok(())
    }

    /// Drops the driver instance (and unloads its library, if dynamic).
    pub fn unload(&mut self) {
        if self.driver.take().is_some() {
            log::info!("output driver unloaded");
        }
    }

    /// Sends `colors` unless they match the previous successful send.
    /// `initial` forces the transmission and omits the delta baseline.
    pub fn send(&mut self, colors: &[Rgb], initial: bool) -> Result<()> {
        debug_assert_eq!(colors.len(), self.last_output.len());
        if initial || colors != &self.last_output[..] {
            let driver = match self.driver.as_mut() {
                Some(d) if self.opened => d,
                _ => return Err(Error::config("output driver closed")),
            };
            let last = if initial {
                None
            } else {
                Some(&self.last_output[..])
            };
            match driver.output_colors(colors, last) {
                Ok(()) => self.last_output.copy_from_slice(colors),
                Err(e) => {
                    log::error!("output driver error: {e}");
                    return Err(Error::from(e));
                }
            }
        }
        Ok(())
    }

    /// Sends an all-black frame. The delta baseline is kept intact so the
    /// driver can still delta against its previous output.
    pub fn lights_off(&mut self) -> Result<()> {
        let zeros = vec![Rgb::BLACK; self.last_output.len()];
        self.send(&zeros, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::test::{recording_registry, Recorder};

    use super::*;

    fn recording_host(channels: usize) -> (DriverHost, Arc<Mutex<Recorder>>) {
        let (registry, recorder) = recording_registry();

        let mut host = DriverHost::new(registry);
        host.configure_channels(channels);
        let mut parm = Parameters::default();
        parm.driver = "recording".into();
        host.open(&mut parm).unwrap();
        (host, recorder)
    }

    #[test]
    fn delta_suppressed_send() {
        let (mut host, recorder) = recording_host(2);
        let red = vec![Rgb::new(255, 0, 0); 2];

        host.send(&red, true).unwrap();
        host.send(&red, false).unwrap();
        host.send(&red, false).unwrap();

        let rec = recorder.lock().unwrap();
        // Only the initial packet went out; its baseline is absent.
        assert_eq!(rec.sent.len(), 1);
        assert_eq!(rec.sent[0].1, None);
    }

    #[test]
    fn changed_colors_carry_the_baseline() {
        let (mut host, recorder) = recording_host(1);
        let red = vec![Rgb::new(255, 0, 0)];
        let blue = vec![Rgb::new(0, 0, 255)];

        host.send(&red, true).unwrap();
        host.send(&blue, false).unwrap();

        let rec = recorder.lock().unwrap();
        assert_eq!(rec.sent.len(), 2);
        assert_eq!(rec.sent[1].0, blue);
        assert_eq!(rec.sent[1].1.as_deref(), Some(&red[..]));
    }

    #[test]
    fn failed_send_keeps_the_baseline() {
        let (mut host, recorder) = recording_host(1);
        let red = vec![Rgb::new(255, 0, 0)];
        host.send(&red, true).unwrap();

        recorder.lock().unwrap().fail_next_send = true;
        let blue = vec![Rgb::new(0, 0, 255)];
        let err = host.send(&blue, false).unwrap_err();
        assert!(err.as_driver().is_some());

        // The baseline still holds red, so resending blue transmits.
        host.send(&blue, false).unwrap();
        let rec = recorder.lock().unwrap();
        assert_eq!(rec.sent.last().unwrap().1.as_deref(), Some(&red[..]));
    }

    #[test]
    fn close_turns_lights_off_first() {
        let (mut host, recorder) = recording_host(2);
        let red = vec![Rgb::new(255, 0, 0); 2];
        host.send(&red, true).unwrap();
        host.close().unwrap();

        let rec = recorder.lock().unwrap();
        assert_eq!(rec.closed, 1);
        let last = rec.sent.last().unwrap();
        assert!(last.0.iter().all(|&c| c == Rgb::BLACK));
        // Lights-off is a regular delta send against the previous frame.
        assert_eq!(last.1.as_deref(), Some(&red[..]));
    }

    #[test]
    fn send_on_closed_driver_is_an_error() {
        let (mut host, _recorder) = recording_host(1);
        host.close().unwrap();
        assert!(host.send(&[Rgb::BLACK], true).is_err());
    }

    #[test]
    fn registry_empty_name_is_null() {
        let registry = DriverRegistry::default();
        let mut parm = Parameters::default();
        parm.driver = String::new();
        assert!(registry.create(&parm).is_ok());
    }

    #[test]
    fn registry_unknown_name_needs_a_path() {
        let registry = DriverRegistry::default();
        let mut parm = Parameters::default();
        parm.driver = "nodevice".into();
        let err = match registry.create(&parm) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("search path"));
    }
}
