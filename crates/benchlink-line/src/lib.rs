//! Drivers for instruments that speak terminated ASCII lines.
//!
//! - [`Multimeter`]: SCPI meter that echoes every instruction
//! - [`AnalogBus`]: analog-input modules polled with `#AA` requests
//!
//! Both sit on a [`LineLink`], which frames lines over any
//! [`SerialChannel`](benchlink_transport::SerialChannel).

pub mod analog;
pub mod error;
pub mod link;
pub mod multimeter;

#[cfg(test)]
pub(crate) mod mock;

pub use analog::{
    analog_serial_settings, parse_reply, AnalogBus, AnalogConfig, ModuleAddress, ModuleReading,
};
pub use error::{LineError, Result};
pub use link::LineLink;
pub use multimeter::{
    multimeter_serial_settings, Coupling, Function, IntegrationRate, LineStats, Multimeter,
    MultimeterConfig, VoltageRange, MULTIMETER_IDENTITY,
};
