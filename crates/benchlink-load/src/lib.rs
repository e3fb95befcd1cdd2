//! Programmable DC load driver.
//!
//! The [`TransactionEngine`] owns the serial channel and turns one command
//! into one verified reply: it writes a frame, waits for a background
//! observer to report that a full frame has arrived, realigns and verifies
//! the reply, and retries timeouts and corrupted replies within a fixed
//! budget. [`ProgrammableLoad`] layers typed, unit-scaled accessors on top.
//!
//! [`SimulatedLoad`] is an in-process stand-in for the instrument that plugs
//! into the same channel seam.

pub mod command;
pub mod engine;
pub mod error;
pub mod load;
pub mod signal;
pub mod sim;
pub mod stats;
pub mod status;

pub use command::{Command, Direction, Mode, Scale};
pub use engine::{EngineConfig, TransactionEngine};
pub use error::{LoadError, Result, RetryCause};
pub use load::{load_serial_settings, CurvePoint, ProductInfo, ProgrammableLoad, Reading};
pub use signal::{ArrivalObserver, ArrivalSignal};
pub use sim::{Fault, SimHandle, SimulatedLoad};
pub use stats::{StatsSnapshot, TransactionStats};
pub use status::{DemandState, StatusCode};
