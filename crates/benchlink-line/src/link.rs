use std::io::{ErrorKind, Read, Write};

use benchlink_transport::SerialChannel;
use bytes::{Buf, BytesMut};

use crate::error::{LineError, Result};

/// Longest reply line accepted before giving up on a terminator.
pub const MAX_LINE_LEN: usize = 1024;

const READ_CHUNK: usize = 64;

/// Terminated ASCII lines over a serial channel.
///
/// Bytes read past a terminator are kept for the next [`read_line`]
/// until [`discard_input`] drops them together with the channel's input.
///
/// [`read_line`]: LineLink::read_line
/// [`discard_input`]: LineLink::discard_input
pub struct LineLink<C> {
    channel: C,
    terminator: u8,
    buf: BytesMut,
}

impl<C: SerialChannel> LineLink<C> {
    pub fn new(channel: C, terminator: u8) -> Self {
        Self {
            channel,
            terminator,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    /// Write `line` followed by the terminator.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(self.terminator);

        self.channel.write_all(&out)?;
        self.channel.flush()?;
        tracing::trace!(line, "line written");
        Ok(())
    }

    /// Read up to the next terminator. The terminator and any trailing
    /// carriage return are stripped.
    pub fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == self.terminator) {
                let raw = self.buf.split_to(pos + 1);
                let text = String::from_utf8_lossy(&raw[..pos]);
                let line = text.trim_end_matches('\r').to_string();
                tracing::trace!(line = %line, "line read");
                return Ok(line);
            }
            if self.buf.len() > MAX_LINE_LEN {
                self.buf.clear();
                return Err(LineError::LineTooLong { max: MAX_LINE_LEN });
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.channel.read(&mut chunk) {
                Ok(0) => {
                    return Err(LineError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "line closed mid-reply",
                    )))
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(LineError::Timeout)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Drop buffered and pending input and output.
    pub fn discard(&mut self) -> Result<()> {
        self.discard_input()?;
        self.channel.discard_output()?;
        Ok(())
    }

    pub fn discard_input(&mut self) -> Result<()> {
        self.buf.advance(self.buf.len());
        self.channel.discard_input()?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Close the channel. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.buf.clear();
        self.channel.close()?;
        Ok(())
    }

    /// Reopen the channel if it is closed.
    pub fn ensure_open(&mut self) -> Result<()> {
        if !self.channel.is_open() {
            self.channel.reopen()?;
        }
        Ok(())
    }

    /// Close and reopen the channel.
    pub fn reopen(&mut self) -> Result<()> {
        self.buf.clear();
        self.channel.reopen()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }
}
