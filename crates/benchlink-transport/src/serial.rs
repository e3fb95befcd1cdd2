use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::error::{Result, TransportError};
use crate::traits::{ArrivalProbe, SerialChannel};

/// Default byte-level read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Line settings used to open a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// OS port name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Assert RTS after opening. Some RS-232/RS-485 adapters power the
    /// line driver from it.
    pub rts: bool,
    /// Timeout for a single blocking read.
    pub read_timeout: Duration,
}

impl SerialSettings {
    /// 8N1 settings at the given baud rate.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            rts: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Assert RTS after opening.
    pub fn with_rts(mut self, rts: bool) -> Self {
        self.rts = rts;
        self
    }

    /// Override the per-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A serial port owned by one driver.
///
/// The port is opened on construction and stays open until [`close`] is
/// called or the stream is dropped.
///
/// [`close`]: SerialChannel::close
pub struct SerialStream {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialStream {
    /// Open a port with the given settings.
    pub fn open(settings: SerialSettings) -> Result<Self> {
        let port = open_port(&settings)?;
        Ok(Self {
            settings,
            port: Some(port),
        })
    }

    /// Settings the port was opened with.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Change the per-read timeout on the open port.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.settings.read_timeout = timeout;
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn port(&self) -> Result<&dyn SerialPort> {
        self.port.as_deref().ok_or(TransportError::Closed)
    }

    fn port_io(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(closed_io_error)
    }
}

fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(settings.path.as_str(), settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .timeout(settings.read_timeout)
        .open()
        .map_err(|source| TransportError::Open {
            path: settings.path.clone(),
            source,
        })?;

    if settings.rts {
        port.write_request_to_send(true)?;
    }
    port.clear(ClearBuffer::Input)?;

    tracing::debug!(
        path = %settings.path,
        baud = settings.baud_rate,
        rts = settings.rts,
        "serial port opened"
    );
    Ok(port)
}

fn closed_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port closed")
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port_io()?.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port_io()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port_io()?.flush()
    }
}

impl SerialChannel for SerialStream {
    fn bytes_available(&self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn discard_output(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn arrival_probe(&self) -> Result<Box<dyn ArrivalProbe>> {
        let port = self.port()?.try_clone()?;
        Ok(Box::new(SerialProbe { port }))
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            drop(port);
            tracing::debug!(path = %self.settings.path, "serial port closed");
        }
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        self.close()?;
        self.port = Some(open_port(&self.settings)?);
        Ok(())
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("path", &self.settings.path)
            .field("baud_rate", &self.settings.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

struct SerialProbe {
    port: Box<dyn SerialPort>,
}

impl ArrivalProbe for SerialProbe {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }
}

/// A serial port visible to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// Port kind: `usb`, `pci`, `bluetooth` or `unknown`.
    pub kind: &'static str,
    /// USB product string, when the driver reports one.
    pub product: Option<String>,
}

/// List serial ports present on this host.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let (kind, product) = match info.port_type {
                SerialPortType::UsbPort(usb) => ("usb", usb.product),
                SerialPortType::PciPort => ("pci", None),
                SerialPortType::BluetoothPort => ("bluetooth", None),
                SerialPortType::Unknown => ("unknown", None),
            };
            PortInfo {
                name: info.port_name,
                kind,
                product,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_8n1() {
        let settings = SerialSettings::new("/dev/ttyUSB0", 38_400);
        assert_eq!(settings.baud_rate, 38_400);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert!(!settings.rts);
        assert_eq!(settings.read_timeout, DEFAULT_READ_TIMEOUT);
    }

    #[test]
    fn settings_builders_override_fields() {
        let settings = SerialSettings::new("COM3", 9_600)
            .with_rts(true)
            .with_read_timeout(Duration::from_secs(2));
        assert!(settings.rts);
        assert_eq!(settings.read_timeout, Duration::from_secs(2));
    }

    #[test]
    fn open_missing_port_reports_path() {
        let settings = SerialSettings::new("/dev/benchlink-no-such-port", 38_400);
        let err = SerialStream::open(settings).unwrap_err();
        match err {
            TransportError::Open { path, .. } => {
                assert_eq!(path, "/dev/benchlink-no-such-port");
            }
            other => panic!("expected open error, got {other:?}"),
        }
    }
}
