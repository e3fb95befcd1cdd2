//! Scripted serial channel for driver tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use benchlink_transport::{ArrivalProbe, SerialChannel, TransportError};

type Responder = Box<dyn FnMut(&str) -> Vec<u8> + Send>;

struct Shared {
    inbound: VecDeque<u8>,
    pending: Vec<u8>,
    lines: Vec<String>,
    open: bool,
    opens: usize,
    closes: usize,
    responder: Option<(u8, Responder)>,
}

/// A channel whose replies come from a closure called once per written
/// line. Reads with nothing queued time out immediately.
#[derive(Clone)]
pub(crate) struct MockChannel {
    shared: Arc<Mutex<Shared>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockChannel {
    pub(crate) fn silent() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                inbound: VecDeque::new(),
                pending: Vec::new(),
                lines: Vec::new(),
                open: true,
                opens: 0,
                closes: 0,
                responder: None,
            })),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn responding(
        terminator: u8,
        responder: impl FnMut(&str) -> Vec<u8> + Send + 'static,
    ) -> Self {
        let mock = Self::silent();
        mock.shared.lock().unwrap().responder = Some((terminator, Box::new(responder)));
        mock
    }

    pub(crate) fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    pub(crate) fn push_input(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().inbound.extend(bytes.iter().copied());
    }

    /// Lines written so far, terminators removed.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.shared.lock().unwrap().lines.clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.shared.lock().unwrap().opens
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.lock().unwrap().closes
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mock closed")
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.open {
            return Err(not_connected());
        }
        if shared.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"));
        }
        let n = buf.len().min(shared.inbound.len());
        for (dst, byte) in buf.iter_mut().zip(shared.inbound.drain(..n)) {
            *dst = byte;
        }
        Ok(n)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.open {
            return Err(not_connected());
        }
        self.written.lock().unwrap().extend_from_slice(buf);

        let Shared {
            pending,
            lines,
            inbound,
            responder,
            ..
        } = &mut *shared;
        for byte in buf {
            match responder.as_mut() {
                Some((terminator, respond)) if *byte == *terminator => {
                    let line = String::from_utf8_lossy(pending).into_owned();
                    pending.clear();
                    inbound.extend(respond(&line));
                    lines.push(line);
                }
                _ => pending.push(*byte),
            }
        }
        if responder.is_none() && buf.last() == Some(&b'\n') {
            lines.push(String::from_utf8_lossy(pending).trim_end().to_string());
            pending.clear();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct NoArrivals;

impl ArrivalProbe for NoArrivals {
    fn bytes_available(&mut self) -> benchlink_transport::Result<usize> {
        Ok(0)
    }
}

impl SerialChannel for MockChannel {
    fn bytes_available(&self) -> benchlink_transport::Result<usize> {
        Ok(self.shared.lock().unwrap().inbound.len())
    }

    fn discard_input(&mut self) -> benchlink_transport::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.open {
            return Err(TransportError::Closed);
        }
        shared.inbound.clear();
        Ok(())
    }

    fn discard_output(&mut self) -> benchlink_transport::Result<()> {
        Ok(())
    }

    fn arrival_probe(&self) -> benchlink_transport::Result<Box<dyn ArrivalProbe>> {
        Ok(Box::new(NoArrivals))
    }

    fn is_open(&self) -> bool {
        self.shared.lock().unwrap().open
    }

    fn close(&mut self) -> benchlink_transport::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.open {
            shared.open = false;
            shared.closes += 1;
            shared.inbound.clear();
        }
        Ok(())
    }

    fn reopen(&mut self) -> benchlink_transport::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.open = true;
        shared.opens += 1;
        Ok(())
    }
}
