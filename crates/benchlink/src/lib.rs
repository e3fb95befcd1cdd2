//! Serial drivers for bench instruments.
//!
//! benchlink talks to a programmable DC load over its binary packet protocol
//! and to line-oriented ASCII instruments (an SCPI multimeter and analog-input
//! modules) over plain serial ports.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial channel abstraction and port enumeration
//! - [`frame`]: fixed-length checksummed load packets with resynchronization
//! - [`load`]: retrying transaction engine and typed load driver (behind `load` feature)
//! - [`line`]: multimeter and analog-input drivers (behind `line` feature)

/// Re-export transport types.
pub mod transport {
    pub use benchlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use benchlink_frame::*;
}

/// Re-export load driver types (requires `load` feature).
#[cfg(feature = "load")]
pub mod load {
    pub use benchlink_load::*;
}

/// Re-export line-protocol driver types (requires `line` feature).
#[cfg(feature = "line")]
pub mod line {
    pub use benchlink_line::*;
}
