//! Dynamically loaded output drivers.
//!
//! A dynamic driver is a shared library exporting a single constructor,
//! `atmoglow_new_output_driver`, that returns a C vtable. The host probes
//! every directory of the `driver_path` list for a file named after the
//! platform template and loads the first readable match. A version mismatch
//! aborts the load.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_int, CStr};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::color::Rgb;
use crate::error::{DriverError, Error};
use crate::parm::{FilterMode, Parameters};
use crate::weight::MIN_WEIGHT_LIMIT;
use crate::Result;

use super::OutputDriver;

/// ABI version of [`AbiOutputDriver`]. Bumped on every layout change.
pub const OUTPUT_DRIVER_ABI_VERSION: u32 = 3;

const ERRMSG_SIZE: usize = 128;
const DRIVER_NAME_SIZE: usize = 16;
const DRIVER_PARAM_SIZE: usize = 2048;
const DRIVER_PATH_SIZE: usize = 128;

#[cfg(windows)]
const SEARCH_PATH_SEP: char = ';';
#[cfg(not(windows))]
const SEARCH_PATH_SEP: char = ':';

ffi_enum! {
    /// Log levels shared with dynamic drivers.
    pub enum AbiLogLevel: c_int {
        None  = 0,
        Error = 1,
        Info  = 2,
        Debug = 3,
    }
}

/// The parameter block passed across the driver ABI. Strings are
/// nul-terminated within their fixed buffers; booleans are 0 or 1.
#[repr(C)]
pub struct AbiParameters {
    pub driver: [c_char; DRIVER_NAME_SIZE],
    pub driver_param: [c_char; DRIVER_PARAM_SIZE],
    pub driver_path: [c_char; DRIVER_PATH_SIZE],
    pub top: c_int,
    pub bottom: c_int,
    pub left: c_int,
    pub right: c_int,
    pub center: c_int,
    pub top_left: c_int,
    pub top_right: c_int,
    pub bottom_left: c_int,
    pub bottom_right: c_int,
    pub overscan: c_int,
    pub darkness_limit: c_int,
    pub edge_weighting: c_int,
    pub weight_limit: c_int,
    pub hue_win_size: c_int,
    pub sat_win_size: c_int,
    pub hue_threshold: c_int,
    pub uniform_brightness: c_int,
    pub brightness: c_int,
    pub filter: c_int,
    pub filter_smoothness: c_int,
    pub filter_length: c_int,
    pub filter_threshold: c_int,
    pub filter_delay: c_int,
    pub wc_red: c_int,
    pub wc_green: c_int,
    pub wc_blue: c_int,
    pub gamma: c_int,
    pub output_rate: c_int,
    pub analyze_rate: c_int,
    pub analyze_size: c_int,
    pub start_delay: c_int,
    pub enabled: c_int,
}

impl AbiParameters {
    fn from_parm(parm: &Parameters) -> Self {
        let mut this: Self = unsafe { std::mem::zeroed() };
        write_cstr(&mut this.driver, &parm.driver);
        write_cstr(&mut this.driver_param, &parm.driver_param);
        write_cstr(&mut this.driver_path, &parm.driver_path);
        this.top = parm.top;
        this.bottom = parm.bottom;
        this.left = parm.left;
        this.right = parm.right;
        this.center = c_int::from(parm.center);
        this.top_left = c_int::from(parm.top_left);
        this.top_right = c_int::from(parm.top_right);
        this.bottom_left = c_int::from(parm.bottom_left);
        this.bottom_right = c_int::from(parm.bottom_right);
        this.overscan = parm.overscan;
        this.darkness_limit = parm.darkness_limit;
        this.edge_weighting = parm.edge_weighting;
        this.weight_limit = c_int::from(MIN_WEIGHT_LIMIT);
        this.hue_win_size = parm.hue_win_size;
        this.sat_win_size = parm.sat_win_size;
        this.hue_threshold = parm.hue_threshold;
        this.uniform_brightness = c_int::from(parm.uniform_brightness);
        this.brightness = parm.brightness;
        this.filter = match parm.filter {
            FilterMode::None => 0,
            FilterMode::Percentage => 1,
            FilterMode::Combined => 2,
        };
        this.filter_smoothness = parm.filter_smoothness;
        this.filter_length = parm.filter_length;
        this.filter_threshold = parm.filter_threshold;
        this.filter_delay = parm.filter_delay;
        this.wc_red = parm.wc_red;
        this.wc_green = parm.wc_green;
        this.wc_blue = parm.wc_blue;
        this.gamma = parm.gamma;
        this.output_rate = parm.output_rate;
        this.analyze_rate = parm.analyze_rate;
        this.analyze_size = parm.analyze_size;
        this.start_delay = parm.start_delay;
        this.enabled = c_int::from(parm.enabled);
        this
    }

    /// Copies driver-refined values back. Only the channel layout may be
    /// imposed by a driver; the remaining fields stay host-owned.
    fn write_back(&self, parm: &mut Parameters) {
        parm.top = self.top;
        parm.bottom = self.bottom;
        parm.left = self.left;
        parm.right = self.right;
        parm.center = self.center != 0;
        parm.top_left = self.top_left != 0;
        parm.top_right = self.top_right != 0;
        parm.bottom_left = self.bottom_left != 0;
        parm.bottom_right = self.bottom_right != 0;
    }
}

/// The C vtable every dynamic driver returns from its constructor.
#[repr(C)]
pub struct AbiOutputDriver {
    pub version: u32,
    pub open: unsafe extern "C" fn(*mut AbiOutputDriver, *mut AbiParameters) -> c_int,
    pub configure: unsafe extern "C" fn(*mut AbiOutputDriver, *mut AbiParameters) -> c_int,
    pub close: unsafe extern "C" fn(*mut AbiOutputDriver) -> c_int,
    pub dispose: unsafe extern "C" fn(*mut AbiOutputDriver),
    pub output_colors:
        unsafe extern "C" fn(*mut AbiOutputDriver, *const Rgb, *const Rgb) -> c_int,
    pub errmsg: [c_char; ERRMSG_SIZE],
}

/// Log callback handed to the driver constructor.
pub type AbiLogFn = unsafe extern "C" fn(level: AbiLogLevel, msg: *const c_char);

/// Exported constructor: `atmoglow_new_output_driver(level, log_fn)`.
pub type NewOutputDriverFn =
    unsafe extern "C" fn(level: AbiLogLevel, log_fn: AbiLogFn) -> *mut AbiOutputDriver;

const CONSTRUCTOR_SYMBOL: &[u8] = b"atmoglow_new_output_driver\0";

fn lib_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("atmoglow-{name}.dll")
    } else {
        format!("atmoglow-{name}.so")
    }
}

fn probe(name: &str, search_path: &str) -> Result<PathBuf> {
    if search_path.is_empty() {
        return Err(Error::config("output driver search path missing"));
    }
    for dir in search_path.split(SEARCH_PATH_SEP).filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(lib_file_name(name));
        log::debug!("search output driver '{}'", candidate.display());
        if std::fs::File::open(&candidate).is_ok() {
            return Ok(candidate);
        }
    }
    Err(Error::config(format!(
        "output driver '{}' not found",
        lib_file_name(name)
    )))
}

fn check_version(version: u32) -> Result<()> {
    if version != OUTPUT_DRIVER_ABI_VERSION {
        return Err(Error::config(format!(
            "wrong version {version} of output driver, expected {OUTPUT_DRIVER_ABI_VERSION}"
        )));
    }
    Ok(())
}

/// Resolves and loads a dynamic driver.
pub(crate) fn load(name: &str, search_path: &str) -> Result<Box<dyn OutputDriver>> {
    let path = probe(name, search_path)?;

    unsafe {
        let lib = libloading::Library::new(&path).map_err(Error::from)?;
        let ctor = *lib
            .get::<NewOutputDriverFn>(CONSTRUCTOR_SYMBOL)
            .map_err(Error::from)?;

        let raw = ctor(current_log_level(), forward_log);
        if raw.is_null() {
            return Err(Error::config(format!(
                "creating output driver instance of '{}' failed",
                path.display()
            )));
        }
        if let Err(e) = check_version((*raw).version) {
            ((*raw).dispose)(raw);
            return Err(e);
        }

        Ok(Box::new(DynDriver { _lib: lib, raw }))
    }
}

fn current_log_level() -> AbiLogLevel {
    match log::max_level() {
        log::LevelFilter::Off => AbiLogLevel::None,
        log::LevelFilter::Error => AbiLogLevel::Error,
        log::LevelFilter::Warn | log::LevelFilter::Info => AbiLogLevel::Info,
        log::LevelFilter::Debug | log::LevelFilter::Trace => AbiLogLevel::Debug,
    }
}

unsafe extern "C" fn forward_log(level: AbiLogLevel, msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    let msg = CStr::from_ptr(msg).to_string_lossy();
    let msg = msg.trim();
    match level {
        AbiLogLevel::Error => log::error!("driver: {msg}"),
        AbiLogLevel::Info => log::info!("driver: {msg}"),
        AbiLogLevel::Debug => log::debug!("driver: {msg}"),
        _ => {}
    }
}

struct DynDriver {
    /// Keeps the library mapped for as long as `raw` is alive.
    _lib: libloading::Library,
    raw: *mut AbiOutputDriver,
}

// Safety: the vtable instance is only ever called from one thread at a time
// (the host serializes access), and the contract requires drivers to keep
// their state behind the instance pointer.
unsafe impl Send for DynDriver {}

impl DynDriver {
    fn errmsg(&self) -> DriverError {
        let msg = unsafe { read_cstr(&(*self.raw).errmsg) };
        DriverError::new(msg)
    }
}

impl OutputDriver for DynDriver {
    fn open(&mut self, parm: &mut Parameters) -> Result<(), DriverError> {
        let mut abi = AbiParameters::from_parm(parm);
        let rc = unsafe { ((*self.raw).open)(self.raw, &mut abi) };
        if rc != 0 {
            return Err(self.errmsg());
        }
        abi.write_back(parm);
        Ok(())
    }

    fn configure(&mut self, parm: &Parameters) -> Result<(), DriverError> {
        let mut abi = AbiParameters::from_parm(parm);
        let rc = unsafe { ((*self.raw).configure)(self.raw, &mut abi) };
        if rc != 0 {
            return Err(self.errmsg());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let rc = unsafe { ((*self.raw).close)(self.raw) };
        if rc != 0 {
            return Err(self.errmsg());
        }
        Ok(())
    }

    fn output_colors(&mut self, colors: &[Rgb], last: Option<&[Rgb]>) -> Result<(), DriverError> {
        let last_ptr = last.map_or(ptr::null(), <[Rgb]>::as_ptr);
        let rc = unsafe { ((*self.raw).output_colors)(self.raw, colors.as_ptr(), last_ptr) };
        if rc != 0 {
            return Err(self.errmsg());
        }
        Ok(())
    }
}

impl Drop for DynDriver {
    fn drop(&mut self) {
        unsafe {
            ((*self.raw).dispose)(self.raw);
        }
    }
}

fn write_cstr(dst: &mut [c_char], src: &str) {
    let take = src.len().min(dst.len() - 1);
    for (d, s) in dst.iter_mut().zip(&src.as_bytes()[..take]) {
        *d = *s as c_char;
    }
    dst[take] = 0;
}

fn read_cstr(src: &[c_char]) -> String {
    let bytes: Vec<u8> = src
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_search_path_is_rejected() {
        let err = probe("serial", "").unwrap_err();
        assert!(err.to_string().contains("search path"));
    }

    #[test]
    fn missing_driver_is_not_found() {
        let err = probe("nodevice", "/nonexistent-a:/nonexistent-b").unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn version_gate() {
        assert!(check_version(OUTPUT_DRIVER_ABI_VERSION).is_ok());
        let err = check_version(2).unwrap_err();
        assert!(err.to_string().contains("wrong version"));
    }

    #[test]
    fn parameter_block_round_trip() {
        let mut parm = Parameters::default();
        parm.driver = "df10ch".into();
        parm.top = 5;
        parm.center = true;
        parm.gamma = 22;

        let mut abi = AbiParameters::from_parm(&parm);
        assert_eq!(read_cstr(&abi.driver), "df10ch");
        assert_eq!(abi.top, 5);
        assert_eq!(abi.center, 1);
        assert_eq!(abi.gamma, 22);
        assert_eq!(abi.weight_limit, i32::from(MIN_WEIGHT_LIMIT));

        // A controller imposing its layout is copied back.
        abi.top = 8;
        abi.bottom = 8;
        abi.center = 0;
        abi.write_back(&mut parm);
        assert_eq!(parm.top, 8);
        assert_eq!(parm.bottom, 8);
        assert!(!parm.center);
    }

    #[test]
    fn cstr_truncates_at_buffer_end() {
        let mut buf = [0 as c_char; 8];
        write_cstr(&mut buf, "a-very-long-driver-name");
        assert_eq!(read_cstr(&buf), "a-very-");
    }
}
