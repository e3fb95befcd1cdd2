//! ASCII analog-input modules on a shared RS-485 bus.
//!
//! Each module answers `#AA` with `>` followed by one signed fixed-width
//! decimal field per channel, e.g. `>+025.12-003.40...`. The port is only
//! held open for the duration of one exchange so other hosts can share it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use benchlink_transport::{SerialChannel, SerialSettings, SerialStream};
use serde::Serialize;

use crate::error::{LineError, Result};
use crate::link::LineLink;

pub const ANALOG_BAUD_RATE: u32 = 9_600;

/// Width of one reply field: a sign and six characters.
pub const FIELD_WIDTH: usize = 7;

const REPLY_START: char = '>';

/// Serial settings for an analog bus on `path`: 9600 8N1, RTS asserted,
/// two second reads.
pub fn analog_serial_settings(path: impl Into<String>) -> SerialSettings {
    SerialSettings::new(path, ANALOG_BAUD_RATE)
        .with_rts(true)
        .with_read_timeout(Duration::from_secs(2))
}

#[derive(Debug, Clone)]
pub struct AnalogConfig {
    /// Exchanges tried per module before giving up.
    pub attempts: u32,
    /// Channels each module reports.
    pub channels_per_module: usize,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            channels_per_module: 8,
        }
    }
}

/// Two-digit hex bus address of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleAddress(String);

impl ModuleAddress {
    pub fn new(address: &str) -> Result<Self> {
        if address.len() == 2 && address.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(address.to_ascii_uppercase()))
        } else {
            Err(LineError::InvalidArgument(format!(
                "module address {address:?} is not two hex digits"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ModuleAddress {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel values from one module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReading {
    pub address: ModuleAddress,
    pub values: Vec<f64>,
}

/// Parse a module reply into `channels` signed values. Anything after the
/// last field (such as a checksum) is ignored.
pub fn parse_reply(reply: &str, channels: usize) -> Result<Vec<f64>> {
    let body = reply
        .strip_prefix(REPLY_START)
        .ok_or_else(|| LineError::parse(reply, "missing '>' start character"))?;
    if !body.is_ascii() {
        return Err(LineError::parse(reply, "non-ASCII characters"));
    }
    if body.len() < channels * FIELD_WIDTH {
        return Err(LineError::parse(
            reply,
            format!("expected {channels} fields of {FIELD_WIDTH} characters"),
        ));
    }

    (0..channels)
        .map(|n| {
            let field = &body[n * FIELD_WIDTH..(n + 1) * FIELD_WIDTH];
            if !field.starts_with(['+', '-']) {
                return Err(LineError::parse(reply, format!("field {n} has no sign")));
            }
            field
                .parse::<f64>()
                .map_err(|_| LineError::parse(reply, format!("field {n} is not a number")))
        })
        .collect()
}

/// Driver for a chain of analog-input modules on one port.
pub struct AnalogBus<C: SerialChannel = SerialStream> {
    link: LineLink<C>,
    modules: Vec<ModuleAddress>,
    config: AnalogConfig,
}

impl AnalogBus<SerialStream> {
    pub fn open(path: impl Into<String>, modules: Vec<ModuleAddress>) -> Result<Self> {
        let stream = SerialStream::open(analog_serial_settings(path))?;
        Self::from_channel(stream, modules, AnalogConfig::default())
    }
}

impl<C: SerialChannel> AnalogBus<C> {
    /// Wrap `channel`. It is closed until the first exchange.
    pub fn from_channel(channel: C, modules: Vec<ModuleAddress>, config: AnalogConfig) -> Result<Self> {
        let mut link = LineLink::new(channel, b'\r');
        link.close()?;
        Ok(Self {
            link,
            modules,
            config,
        })
    }

    pub fn modules(&self) -> &[ModuleAddress] {
        &self.modules
    }

    fn transaction(&mut self, request: &str) -> Result<String> {
        self.link.ensure_open()?;
        let reply = self
            .link
            .discard_input()
            .and_then(|()| self.link.write_line(request))
            .and_then(|()| self.link.read_line());
        self.link.close()?;
        reply
    }

    /// Read every channel of one module.
    pub fn read_module(&mut self, address: &ModuleAddress) -> Result<Vec<f64>> {
        let request = format!("#{}", address.as_str());

        for attempt in 1..=self.config.attempts {
            match self.transaction(&request) {
                Ok(reply) => return parse_reply(&reply, self.config.channels_per_module),
                Err(LineError::Timeout) => {
                    tracing::warn!(module = address.as_str(), attempt, "analog module did not answer");
                }
                Err(err) => return Err(err),
            }
        }

        Err(LineError::RetriesExhausted {
            command: request,
            attempts: self.config.attempts,
        })
    }

    /// Read every configured module, in order.
    pub fn read_modules(&mut self) -> Result<Vec<ModuleReading>> {
        let modules = self.modules.clone();
        modules
            .into_iter()
            .map(|address| {
                let values = self.read_module(&address)?;
                Ok(ModuleReading { address, values })
            })
            .collect()
    }

    /// Channels of all modules concatenated.
    pub fn read_all(&mut self) -> Result<Vec<f64>> {
        Ok(self
            .read_modules()?
            .into_iter()
            .flat_map(|reading| reading.values)
            .collect())
    }

    /// Close the port. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.link.close()
    }
}
