//! Image analyze, color filter and output engine for Atmolight-style LED
//! controllers.
//!
//! For every captured video frame the engine derives one RGB color per
//! configured light channel from weighted HSV histograms, runs the color
//! sequence through a chain of temporal filters and hands it to an output
//! driver.
//!
//! See [`Pipeline`] for the main entry point into the library.

#[macro_use]
mod macros;
mod pixelformat;
#[cfg(test)]
mod test;

pub mod analyze;
pub mod color;
pub mod driver;
pub mod error;
pub mod filter;
pub mod layout;
pub mod parm;
pub mod pipeline;
pub mod source;
pub mod ticket;
pub mod weight;

pub use color::Rgb;
pub use driver::{DriverHost, DriverRegistry, FileDriver, NullDriver, OutputDriver};
pub use error::{DriverError, Error};
pub use layout::{Channel, ChannelLayout, Zone};
pub use parm::{FilterMode, Parameters, ParmValue};
pub use pipeline::Pipeline;
pub use pixelformat::PixelFormat;
pub use source::{FrameInfo, FrameSource, GrabError, GrabFlags, GrabRequest};
pub use ticket::Ticket;

type Result<T, E = Error> = std::result::Result<T, E>;
