use std::io::{Read, Write};

use crate::error::Result;

/// A byte channel to one instrument: implements Read + Write.
///
/// Reads honour the channel's per-read timeout and surface
/// `ErrorKind::TimedOut` when no byte arrives in time. A closed channel
/// fails every read and write with `ErrorKind::NotConnected`.
pub trait SerialChannel: Read + Write + Send {
    /// Number of received bytes waiting to be read.
    fn bytes_available(&self) -> Result<usize>;

    /// Drop any bytes received but not yet read.
    fn discard_input(&mut self) -> Result<()>;

    /// Drop any bytes written but not yet transmitted.
    fn discard_output(&mut self) -> Result<()>;

    /// Create an independent handle that reports pending input.
    ///
    /// The probe may be moved to another thread; it never consumes bytes.
    fn arrival_probe(&self) -> Result<Box<dyn ArrivalProbe>>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Close the channel. Closing an already-closed channel is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Reopen a closed channel with its original settings.
    fn reopen(&mut self) -> Result<()>;
}

/// Reports how many bytes are waiting on a channel.
pub trait ArrivalProbe: Send {
    /// Number of received bytes waiting to be read.
    fn bytes_available(&mut self) -> Result<usize>;
}

impl<T: SerialChannel + ?Sized> SerialChannel for Box<T> {
    fn bytes_available(&self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn discard_output(&mut self) -> Result<()> {
        (**self).discard_output()
    }

    fn arrival_probe(&self) -> Result<Box<dyn ArrivalProbe>> {
        (**self).arrival_probe()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn reopen(&mut self) -> Result<()> {
        (**self).reopen()
    }
}
