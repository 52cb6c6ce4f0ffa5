//! The typed configuration surface.
//!
//! Parameters exist in two copies at runtime: the *pending* copy mutated
//! through this module's accessors and the *active* snapshot the worker
//! loops read. [`crate::pipeline::Pipeline::reconfigure`] moves pending to
//! active at controlled points.

use std::fmt;

use crate::error::Error;
use crate::layout::ChannelLayout;
use crate::Result;

/// Maximum number of channels along one border zone.
pub const MAX_BORDER_CHANNELS: i32 = 128;

/// Maximum byte length of the `driver` parameter.
pub const MAX_DRIVER_NAME_LEN: usize = 15;
/// Maximum byte length of the `driver_param` parameter.
pub const MAX_DRIVER_PARAM_LEN: usize = 2047;
/// Maximum byte length of the `driver_path` parameter.
pub const MAX_DRIVER_PATH_LEN: usize = 127;

/// Temporal filter selection for the analyzed color stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FilterMode {
    /// Analyzed colors pass through unfiltered.
    None,
    /// Exponential smoothing controlled by `filter_smoothness`.
    Percentage,
    /// Moving mean with jump detection, plus the percentage stage.
    #[default]
    Combined,
}

impl FilterMode {
    const OPTIONS: &'static [&'static str] = &["off", "percentage", "combined"];

    fn from_index(i: i32) -> Option<Self> {
        match i {
            0 => Some(Self::None),
            1 => Some(Self::Percentage),
            2 => Some(Self::Combined),
            _ => None,
        }
    }

    fn index(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Percentage => 1,
            Self::Combined => 2,
        }
    }
}

/// A configuration snapshot.
///
/// Every numeric field is kept inside the range its descriptor declares;
/// [`Parameters::set`] is the checked way in. Fields are public so that the
/// analyzer and filter chain can read them without accessor noise.
#[derive(Clone, PartialEq, Debug)]
pub struct Parameters {
    pub enabled: bool,
    pub driver: String,
    pub driver_param: String,
    pub driver_path: String,

    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
    pub center: bool,
    pub top_left: bool,
    pub top_right: bool,
    pub bottom_left: bool,
    pub bottom_right: bool,

    pub analyze_rate: i32,
    pub analyze_size: i32,
    pub overscan: i32,
    pub darkness_limit: i32,
    pub edge_weighting: i32,
    pub hue_win_size: i32,
    pub sat_win_size: i32,
    pub hue_threshold: i32,
    pub brightness: i32,
    pub uniform_brightness: bool,

    pub filter: FilterMode,
    pub filter_smoothness: i32,
    pub filter_length: i32,
    pub filter_threshold: i32,
    pub filter_delay: i32,
    pub output_rate: i32,
    pub start_delay: i32,

    pub wc_red: i32,
    pub wc_green: i32,
    pub wc_blue: i32,
    pub gamma: i32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            enabled: true,
            driver: "null".into(),
            driver_param: String::new(),
            driver_path: String::new(),
            top: 0,
            bottom: 0,
            left: 0,
            right: 0,
            center: false,
            top_left: false,
            top_right: false,
            bottom_left: false,
            bottom_right: false,
            analyze_rate: 35,
            analyze_size: 1,
            overscan: 0,
            darkness_limit: 1,
            edge_weighting: 60,
            hue_win_size: 3,
            sat_win_size: 3,
            hue_threshold: 93,
            brightness: 100,
            uniform_brightness: false,
            filter: FilterMode::Combined,
            filter_smoothness: 50,
            filter_length: 500,
            filter_threshold: 40,
            filter_delay: 0,
            output_rate: 20,
            start_delay: 250,
            wc_red: 255,
            wc_green: 255,
            wc_blue: 255,
            gamma: 10,
        }
    }
}

impl Parameters {
    /// The channel layout encoded in the nine zone count fields.
    pub fn layout(&self) -> ChannelLayout {
        ChannelLayout {
            top: self.top,
            bottom: self.bottom,
            left: self.left,
            right: self.right,
            center: self.center,
            top_left: self.top_left,
            top_right: self.top_right,
            bottom_left: self.bottom_left,
            bottom_right: self.bottom_right,
        }
    }

    /// Width of the grabbed analyze image selected by `analyze_size`.
    pub fn analyze_image_width(&self) -> i32 {
        (self.analyze_size + 1) * 64
    }

    /// Reads a parameter by its descriptor name.
    pub fn get(&self, name: &str) -> Option<ParmValue> {
        let v = match name {
            "enabled" => ParmValue::Bool(self.enabled),
            "driver" => ParmValue::Str(self.driver.clone()),
            "driver_param" => ParmValue::Str(self.driver_param.clone()),
            "driver_path" => ParmValue::Str(self.driver_path.clone()),
            "top" => ParmValue::Int(self.top),
            "bottom" => ParmValue::Int(self.bottom),
            "left" => ParmValue::Int(self.left),
            "right" => ParmValue::Int(self.right),
            "center" => ParmValue::Bool(self.center),
            "top_left" => ParmValue::Bool(self.top_left),
            "top_right" => ParmValue::Bool(self.top_right),
            "bottom_left" => ParmValue::Bool(self.bottom_left),
            "bottom_right" => ParmValue::Bool(self.bottom_right),
            "analyze_rate" => ParmValue::Int(self.analyze_rate),
            "analyze_size" => ParmValue::Int(self.analyze_size),
            "overscan" => ParmValue::Int(self.overscan),
            "darkness_limit" => ParmValue::Int(self.darkness_limit),
            "edge_weighting" => ParmValue::Int(self.edge_weighting),
            "hue_win_size" => ParmValue::Int(self.hue_win_size),
            "sat_win_size" => ParmValue::Int(self.sat_win_size),
            "hue_threshold" => ParmValue::Int(self.hue_threshold),
            "brightness" => ParmValue::Int(self.brightness),
            "uniform_brightness" => ParmValue::Bool(self.uniform_brightness),
            "filter" => ParmValue::Int(self.filter.index()),
            "filter_smoothness" => ParmValue::Int(self.filter_smoothness),
            "filter_length" => ParmValue::Int(self.filter_length),
            "filter_threshold" => ParmValue::Int(self.filter_threshold),
            "filter_delay" => ParmValue::Int(self.filter_delay),
            "output_rate" => ParmValue::Int(self.output_rate),
            "start_delay" => ParmValue::Int(self.start_delay),
            "wc_red" => ParmValue::Int(self.wc_red),
            "wc_green" => ParmValue::Int(self.wc_green),
            "wc_blue" => ParmValue::Int(self.wc_blue),
            "gamma" => ParmValue::Int(self.gamma),
            _ => return None,
        };
        Some(v)
    }

    /// Writes a parameter by name, validating type and range against the
    /// descriptor table.
    pub fn set(&mut self, name: &str, value: ParmValue) -> Result<()> {
        let descr = descriptor(name)
            .ok_or_else(|| Error::config(format!("unknown parameter '{name}'")))?;

        match (&descr.kind, &value) {
            (ParmKind::Bool, ParmValue::Bool(_)) => {}
            (ParmKind::Int { min, max, .. }, ParmValue::Int(v)) => {
                if v < min || v > max {
                    return Err(Error::config(format!(
                        "'{name}' value {v} not in range {min} ... {max}"
                    )));
                }
            }
            (ParmKind::Str { max_len }, ParmValue::Str(s)) => {
                if s.len() > *max_len {
                    return Err(Error::config(format!(
                        "maximum length for '{name}' is {max_len}"
                    )));
                }
            }
            _ => {
                return Err(Error::config(format!(
                    "wrong value type for parameter '{name}'"
                )))
            }
        }

        match (name, value) {
            ("enabled", ParmValue::Bool(v)) => self.enabled = v,
            ("driver", ParmValue::Str(v)) => self.driver = v,
            ("driver_param", ParmValue::Str(v)) => self.driver_param = v,
            ("driver_path", ParmValue::Str(v)) => self.driver_path = v,
            ("top", ParmValue::Int(v)) => self.top = v,
            ("bottom", ParmValue::Int(v)) => self.bottom = v,
            ("left", ParmValue::Int(v)) => self.left = v,
            ("right", ParmValue::Int(v)) => self.right = v,
            ("center", ParmValue::Bool(v)) => self.center = v,
            ("top_left", ParmValue::Bool(v)) => self.top_left = v,
            ("top_right", ParmValue::Bool(v)) => self.top_right = v,
            ("bottom_left", ParmValue::Bool(v)) => self.bottom_left = v,
            ("bottom_right", ParmValue::Bool(v)) => self.bottom_right = v,
            ("analyze_rate", ParmValue::Int(v)) => self.analyze_rate = v,
            ("analyze_size", ParmValue::Int(v)) => self.analyze_size = v,
            ("overscan", ParmValue::Int(v)) => self.overscan = v,
            ("darkness_limit", ParmValue::Int(v)) => self.darkness_limit = v,
            ("edge_weighting", ParmValue::Int(v)) => self.edge_weighting = v,
            ("hue_win_size", ParmValue::Int(v)) => self.hue_win_size = v,
            ("sat_win_size", ParmValue::Int(v)) => self.sat_win_size = v,
            ("hue_threshold", ParmValue::Int(v)) => self.hue_threshold = v,
            ("brightness", ParmValue::Int(v)) => self.brightness = v,
            ("uniform_brightness", ParmValue::Bool(v)) => self.uniform_brightness = v,
            ("filter", ParmValue::Int(v)) => {
                // Range-checked above against the option count.
                self.filter = FilterMode::from_index(v).unwrap_or_default();
            }
            ("filter_smoothness", ParmValue::Int(v)) => self.filter_smoothness = v,
            ("filter_length", ParmValue::Int(v)) => self.filter_length = v,
            ("filter_threshold", ParmValue::Int(v)) => self.filter_threshold = v,
            ("filter_delay", ParmValue::Int(v)) => self.filter_delay = v,
            ("output_rate", ParmValue::Int(v)) => self.output_rate = v,
            ("start_delay", ParmValue::Int(v)) => self.start_delay = v,
            ("wc_red", ParmValue::Int(v)) => self.wc_red = v,
            ("wc_green", ParmValue::Int(v)) => self.wc_green = v,
            ("wc_blue", ParmValue::Int(v)) => self.wc_blue = v,
            ("gamma", ParmValue::Int(v)) => self.gamma = v,
            _ => unreachable!("descriptor/type matrix verified above"),
        }
        Ok(())
    }

    /// Serializes all parameters into the `name=value,...` form the host
    /// plugins persist in their configuration files.
    pub fn to_parm_string(&self) -> String {
        let mut out = String::new();
        for d in descriptors() {
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(d.name);
            out.push('=');
            match self.get(d.name) {
                Some(ParmValue::Bool(v)) => out.push(if v { '1' } else { '0' }),
                Some(ParmValue::Int(v)) => out.push_str(&v.to_string()),
                Some(ParmValue::Str(v)) => out.push_str(&v),
                None => unreachable!("descriptor without field"),
            }
        }
        out
    }

    /// Applies a `name=value,...` string produced by [`Self::to_parm_string`].
    ///
    /// Unknown names, malformed entries and out-of-range values are
    /// configuration errors; earlier entries of the string stay applied.
    pub fn apply_parm_string(&mut self, s: &str) -> Result<()> {
        for entry in s.split(',').filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::config(format!("malformed parameter entry '{entry}'")))?;
            let descr = descriptor(name)
                .ok_or_else(|| Error::config(format!("unknown parameter '{name}'")))?;
            let value = match descr.kind {
                ParmKind::Bool => ParmValue::Bool(value == "1"),
                ParmKind::Int { .. } => ParmValue::Int(value.parse().map_err(|_| {
                    Error::config(format!("'{name}' value '{value}' is not an integer"))
                })?),
                ParmKind::Str { .. } => ParmValue::Str(value.to_owned()),
            };
            self.set(name, value)?;
        }
        Ok(())
    }
}

/// A parameter value in its external form.
#[derive(Clone, PartialEq, Debug)]
pub enum ParmValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

impl fmt::Display for ParmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
            Self::Int(v) => v.fmt(f),
            Self::Str(v) => v.fmt(f),
        }
    }
}

/// Value type and bounds of one parameter.
pub enum ParmKind {
    Bool,
    Int {
        min: i32,
        max: i32,
        /// Human-readable names when the integer selects from an enumeration.
        options: Option<&'static [&'static str]>,
    },
    Str {
        max_len: usize,
    },
}

/// One entry of the configuration surface.
pub struct ParmDescr {
    pub name: &'static str,
    pub kind: ParmKind,
    pub help: &'static str,
}

const fn int(name: &'static str, min: i32, max: i32, help: &'static str) -> ParmDescr {
    ParmDescr {
        name,
        kind: ParmKind::Int {
            min,
            max,
            options: None,
        },
        help,
    }
}

const fn boolean(name: &'static str, help: &'static str) -> ParmDescr {
    ParmDescr {
        name,
        kind: ParmKind::Bool,
        help,
    }
}

const fn string(name: &'static str, max_len: usize, help: &'static str) -> ParmDescr {
    ParmDescr {
        name,
        kind: ParmKind::Str { max_len },
        help,
    }
}

static DESCRIPTORS: &[ParmDescr] = &[
    boolean("enabled", "Launch on startup"),
    string("driver", MAX_DRIVER_NAME_LEN, "Output driver name"),
    string("driver_param", MAX_DRIVER_PARAM_LEN, "Driver parameters"),
    string("driver_path", MAX_DRIVER_PATH_LEN, "Output driver search path"),
    int("top", 0, MAX_BORDER_CHANNELS, "Sections at top area"),
    int("bottom", 0, MAX_BORDER_CHANNELS, "Sections at bottom area"),
    int("left", 0, MAX_BORDER_CHANNELS, "Sections at left area"),
    int("right", 0, MAX_BORDER_CHANNELS, "Sections at right area"),
    boolean("center", "Activate center area"),
    boolean("top_left", "Activate top left area"),
    boolean("top_right", "Activate top right area"),
    boolean("bottom_left", "Activate bottom left area"),
    boolean("bottom_right", "Activate bottom right area"),
    int("analyze_rate", 10, 500, "Analyze rate [ms]"),
    ParmDescr {
        name: "analyze_size",
        kind: ParmKind::Int {
            min: 0,
            max: 3,
            options: Some(&["64", "128", "192", "256"]),
        },
        help: "Size of analyze image",
    },
    int("overscan", 0, 200, "Ignored overscan border [%1000]"),
    int("darkness_limit", 0, 100, "Limit for black pixel"),
    int("edge_weighting", 10, 200, "Power of edge weighting"),
    int("hue_win_size", 0, 5, "Hue windowing size"),
    int("sat_win_size", 0, 5, "Saturation windowing size"),
    int("hue_threshold", 0, 100, "Hue threshold [%]"),
    int("brightness", 50, 300, "Brightness [%]"),
    boolean("uniform_brightness", "Uniform brightness mode"),
    ParmDescr {
        name: "filter",
        kind: ParmKind::Int {
            min: 0,
            max: 2,
            options: Some(FilterMode::OPTIONS),
        },
        help: "Filter mode",
    },
    int("filter_smoothness", 1, 100, "Filter smoothness [%]"),
    int("filter_length", 300, 5000, "Filter length [ms]"),
    int("filter_threshold", 1, 100, "Filter threshold [%]"),
    int("filter_delay", 0, 1000, "Output delay [ms]"),
    int("output_rate", 10, 500, "Output rate [ms]"),
    int("start_delay", 0, 5000, "Delay after stream start [ms]"),
    int("wc_red", 0, 255, "Red white calibration"),
    int("wc_green", 0, 255, "Green white calibration"),
    int("wc_blue", 0, 255, "Blue white calibration"),
    int("gamma", 0, 30, "Gamma correction"),
];

/// The full descriptor table, in canonical order.
pub fn descriptors() -> &'static [ParmDescr] {
    DESCRIPTORS
}

fn descriptor(name: &str) -> Option<&'static ParmDescr> {
    DESCRIPTORS.iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_range() {
        let parm = Parameters::default();
        for d in descriptors() {
            let v = parm.get(d.name).expect("descriptor without field");
            match (&d.kind, v) {
                (ParmKind::Int { min, max, .. }, ParmValue::Int(i)) => {
                    assert!(i >= *min && i <= *max, "{} default {i} out of range", d.name);
                }
                (ParmKind::Bool, ParmValue::Bool(_)) => {}
                (ParmKind::Str { max_len }, ParmValue::Str(s)) => {
                    assert!(s.len() <= *max_len);
                }
                _ => panic!("{}: descriptor/value type mismatch", d.name),
            }
        }
    }

    #[test]
    fn set_rejects_out_of_range() {
        let mut parm = Parameters::default();
        let err = parm.set("brightness", ParmValue::Int(400)).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("brightness"));
        assert_eq!(parm.brightness, 100);

        assert!(parm.set("no_such_parm", ParmValue::Int(0)).is_err());
        assert!(parm.set("brightness", ParmValue::Bool(true)).is_err());
    }

    #[test]
    fn set_filter_by_index() {
        let mut parm = Parameters::default();
        parm.set("filter", ParmValue::Int(1)).unwrap();
        assert_eq!(parm.filter, FilterMode::Percentage);
        assert!(parm.set("filter", ParmValue::Int(3)).is_err());
    }

    #[test]
    fn parm_string_round_trip() {
        let mut parm = Parameters::default();
        parm.set("driver", ParmValue::Str("file".into())).unwrap();
        parm.set("top", ParmValue::Int(4)).unwrap();
        parm.set("gamma", ParmValue::Int(25)).unwrap();
        parm.set("center", ParmValue::Bool(true)).unwrap();

        let mut restored = Parameters::default();
        restored.apply_parm_string(&parm.to_parm_string()).unwrap();
        assert_eq!(restored, parm);
    }

    #[test]
    fn parm_string_rejects_garbage() {
        let mut parm = Parameters::default();
        assert!(parm.apply_parm_string("top").is_err());
        assert!(parm.apply_parm_string("nope=1").is_err());
        assert!(parm.apply_parm_string("top=many").is_err());
        assert!(parm.apply_parm_string("top=999").is_err());
    }
}
