//! Serial channel abstraction for bench instrument drivers.
//!
//! This is the lowest layer of benchlink. Every instrument driver talks to
//! its device through a [`SerialChannel`]: a byte stream that can also report
//! how many bytes are waiting, discard stale input, and hand out an
//! independent [`ArrivalProbe`] for a background observer thread.
//!
//! [`SerialStream`] is the real implementation over an OS serial port.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{available_ports, PortInfo, SerialSettings, SerialStream};
pub use serialport::{DataBits, FlowControl, Parity, StopBits};
pub use traits::{ArrivalProbe, SerialChannel};
