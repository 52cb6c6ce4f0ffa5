//! Defines the [`Error`] type used throughout the library.

use core::fmt;

/// Error reported by an output driver.
///
/// Drivers describe failures with a short message, mirroring the fixed-size
/// `errmsg` buffer of the dynamic driver ABI. The message of a dynamically
/// loaded driver is truncated to that buffer's length.
#[derive(Clone, PartialEq, Eq)]
pub struct DriverError {
    msg: String,
}

impl DriverError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    /// The driver-supplied error message.
    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for DriverError {}

pub(crate) enum Repr {
    /// Out-of-range or inconsistent configuration; the pipeline keeps its
    /// previous state.
    Config(String),
    /// Failure reported by an output driver (load, open, configure or send).
    Driver(DriverError),
    Libloading(libloading::Error),
    Io(std::io::Error),
}

impl From<String> for Repr {
    fn from(v: String) -> Self {
        Self::Config(v)
    }
}

impl From<DriverError> for Repr {
    fn from(v: DriverError) -> Self {
        Self::Driver(v)
    }
}

impl From<libloading::Error> for Repr {
    fn from(v: libloading::Error) -> Self {
        Self::Libloading(v)
    }
}

impl From<std::io::Error> for Repr {
    fn from(v: std::io::Error) -> Self {
        Self::Io(v)
    }
}

/// The main error type used by this library.
pub struct Error {
    repr: Repr,
}

impl Error {
    /// If this [`Error`] was reported by an output driver, returns the
    /// corresponding [`DriverError`].
    pub fn as_driver(&self) -> Option<&DriverError> {
        match &self.repr {
            Repr::Driver(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` when this is a configuration error (the pipeline state
    /// is unchanged and a corrected reconfigure may be attempted).
    pub fn is_config(&self) -> bool {
        matches!(self.repr, Repr::Config(_))
    }

    pub(crate) fn from(e: impl Into<Repr>) -> Self {
        Self { repr: e.into() }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self {
            repr: Repr::Config(msg.into()),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Config(s) => s.fmt(f),
            Repr::Driver(e) => e.fmt(f),
            Repr::Libloading(e) => e.fmt(f),
            Repr::Io(e) => e.fmt(f),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Config(e) => e.fmt(f),
            Repr::Driver(e) => write!(f, "output driver error: {e}"),
            Repr::Libloading(e) => e.fmt(f),
            Repr::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}
