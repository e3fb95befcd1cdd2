use std::io::{ErrorKind, Read};

use crate::codec::{Frame, FRAME_LEN};
use crate::error::{FrameError, Result};
use crate::locator::locate_frame;

/// Reads start-aligned frames from any `Read` stream.
///
/// Reads exactly as many bytes as a frame needs and never buffers beyond
/// it, so unread bytes stay in the channel for the next exchange.
pub struct FrameReader<T> {
    inner: T,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Read one frame length of bytes and realign on the start marker.
    ///
    /// The returned frame is not checksum-verified.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut window = [0u8; FRAME_LEN];
        fill(&mut self.inner, &mut window)?;
        tracing::trace!(bytes = ?window, "frame window received");

        let inner = &mut self.inner;
        locate_frame(window, |dst| fill(inner, dst))
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn fill<R: Read + ?Sized>(reader: &mut R, dst: &mut [u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < dst.len() {
        match reader.read(&mut dst[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
