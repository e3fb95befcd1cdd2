//! SCPI bench multimeter.
//!
//! The meter echoes every line it receives. A write only counts once the
//! echo has come back; queries then read one more line for the answer.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use benchlink_transport::{SerialChannel, SerialSettings, SerialStream};
use serde::Serialize;

use crate::error::{LineError, Result};
use crate::link::LineLink;

pub const MULTIMETER_BAUD_RATE: u32 = 38_400;

/// Identity substring every supported meter reports.
pub const MULTIMETER_IDENTITY: &str = "2831E  Multimeter";

/// Serial settings for a multimeter on `path`: 38400 8N1, one second reads.
pub fn multimeter_serial_settings(path: impl Into<String>) -> SerialSettings {
    SerialSettings::new(path, MULTIMETER_BAUD_RATE).with_read_timeout(Duration::from_secs(1))
}

/// Retry and timing policy for a [`Multimeter`].
#[derive(Debug, Clone)]
pub struct MultimeterConfig {
    /// Additional attempts after a missing or wrong echo or answer.
    pub retries: u32,
    /// Wait after `*RST` before the port is cycled.
    pub reset_settle: Duration,
    /// Pause between closing and reopening the port on reset.
    pub reopen_pause: Duration,
    /// Substring the `*IDN?` answer must contain.
    pub expected_identity: String,
}

impl Default for MultimeterConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            reset_settle: Duration::from_millis(2_500),
            reopen_pause: Duration::from_millis(100),
            expected_identity: MULTIMETER_IDENTITY.to_string(),
        }
    }
}

/// Measurement function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Function {
    VoltageAc,
    VoltageDc,
    CurrentAc,
    CurrentDc,
    Resistance,
    Frequency,
    Period,
    Diode,
    Continuity,
}

impl Function {
    pub const ALL: [Function; 9] = [
        Function::VoltageAc,
        Function::VoltageDc,
        Function::CurrentAc,
        Function::CurrentDc,
        Function::Resistance,
        Function::Frequency,
        Function::Period,
        Function::Diode,
        Function::Continuity,
    ];

    /// SCPI mnemonic.
    pub fn scpi(self) -> &'static str {
        match self {
            Function::VoltageAc => "VOLTAGE:AC",
            Function::VoltageDc => "VOLTAGE:DC",
            Function::CurrentAc => "CURRENT:AC",
            Function::CurrentDc => "CURRENT:DC",
            Function::Resistance => "RESISTANCE",
            Function::Frequency => "FREQUENCY",
            Function::Period => "PERIOD",
            Function::Diode => "DIODE",
            Function::Continuity => "CONTINUITY",
        }
    }

    /// Short name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Function::VoltageAc => "voltage-ac",
            Function::VoltageDc => "voltage-dc",
            Function::CurrentAc => "current-ac",
            Function::CurrentDc => "current-dc",
            Function::Resistance => "resistance",
            Function::Frequency => "frequency",
            Function::Period => "period",
            Function::Diode => "diode",
            Function::Continuity => "continuity",
        }
    }

    /// Find the function named in a `:FUNCTION?` answer.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let reply = reply.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|function| reply.contains(function.scpi()))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Function {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|function| function.name() == s)
            .ok_or_else(|| LineError::InvalidArgument(format!("unknown function {s:?}")))
    }
}

/// AC or DC voltage subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    fn scpi(self) -> &'static str {
        match self {
            Coupling::Ac => "VOLTAGE:AC",
            Coupling::Dc => "VOLTAGE:DC",
        }
    }
}

/// Voltage integration time in power-line cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationRate {
    Fast,
    Medium,
    Slow,
}

impl IntegrationRate {
    pub fn cycles(self) -> f64 {
        match self {
            IntegrationRate::Fast => 0.1,
            IntegrationRate::Medium => 1.0,
            IntegrationRate::Slow => 10.0,
        }
    }
}

/// Voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageRange {
    Millivolts200,
    Volts2,
    Volts20,
    Volts200,
    /// Highest range: 750 V AC, 1000 V DC.
    Max,
}

impl VoltageRange {
    /// Full-scale volts for the given coupling.
    pub fn volts(self, coupling: Coupling) -> f64 {
        match (self, coupling) {
            (VoltageRange::Millivolts200, _) => 0.2,
            (VoltageRange::Volts2, _) => 2.0,
            (VoltageRange::Volts20, _) => 20.0,
            (VoltageRange::Volts200, _) => 200.0,
            (VoltageRange::Max, Coupling::Ac) => 750.0,
            (VoltageRange::Max, Coupling::Dc) => 1_000.0,
        }
    }
}

/// Exchange counters for a [`Multimeter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub attempts: u64,
    pub retries: u64,
}

enum Echo {
    Matched,
    Mismatch(String),
    Missing,
}

/// Driver for an SCPI multimeter.
pub struct Multimeter<C: SerialChannel = SerialStream> {
    link: LineLink<C>,
    config: MultimeterConfig,
    port: String,
    stats: LineStats,
}

impl Multimeter<SerialStream> {
    pub fn open(path: impl Into<String>) -> Result<Self> {
        Self::open_with_config(multimeter_serial_settings(path), MultimeterConfig::default())
    }

    pub fn open_with_config(settings: SerialSettings, config: MultimeterConfig) -> Result<Self> {
        let port = settings.path.clone();
        let stream = SerialStream::open(settings)?;
        Self::from_channel(stream, port, config)
    }
}

impl<C: SerialChannel> Multimeter<C> {
    /// Reset the meter on `channel` and check that it identifies as the
    /// expected model. `port` names the channel in errors.
    pub fn from_channel(channel: C, port: impl Into<String>, config: MultimeterConfig) -> Result<Self> {
        let mut meter = Self {
            link: LineLink::new(channel, b'\n'),
            config,
            port: port.into(),
            stats: LineStats::default(),
        };
        let expected = meter.config.expected_identity.clone();
        match meter.handshake() {
            Ok(identity) if identity.contains(&expected) => {
                tracing::info!(port = %meter.port, identity = %identity, "multimeter ready");
                Ok(meter)
            }
            Ok(identity) => Err(LineError::WrongInstrument {
                port: meter.port.clone(),
                expected,
                found: identity,
            }),
            Err(LineError::Timeout | LineError::RetriesExhausted { .. }) => {
                Err(LineError::NoInstrument {
                    port: meter.port.clone(),
                    expected,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn handshake(&mut self) -> Result<String> {
        self.link.discard()?;
        self.reset()?;
        self.identity()
    }

    fn exchange_echo(&mut self, instruction: &str) -> Result<Echo> {
        self.stats.attempts += 1;
        self.link.write_line(instruction)?;
        match self.link.read_line() {
            Ok(echo) if echo.contains(instruction) => Ok(Echo::Matched),
            Ok(echo) => Ok(Echo::Mismatch(echo)),
            Err(LineError::Timeout) => Ok(Echo::Missing),
            Err(err) => Err(err),
        }
    }

    /// Write one instruction and wait for its echo.
    pub fn write(&mut self, instruction: &str) -> Result<()> {
        let mut retries = 0u32;
        loop {
            match self.exchange_echo(instruction)? {
                Echo::Matched => return Ok(()),
                Echo::Mismatch(echo) => {
                    tracing::debug!(instruction, echo = %echo, "echo mismatch");
                }
                Echo::Missing => tracing::debug!(instruction, "no echo"),
            }

            if retries >= self.config.retries {
                return Err(LineError::RetriesExhausted {
                    command: instruction.to_string(),
                    attempts: retries + 1,
                });
            }
            retries += 1;
            self.stats.retries += 1;
            tracing::warn!(instruction, retry = retries, "retrying multimeter write");
        }
    }

    /// Write a query and return the answer line.
    pub fn query(&mut self, instruction: &str) -> Result<String> {
        let mut retries = 0u32;
        loop {
            self.write(instruction)?;
            match self.link.read_line() {
                Ok(answer) => return Ok(answer),
                Err(LineError::Timeout) if retries < self.config.retries => {
                    retries += 1;
                    self.stats.retries += 1;
                    tracing::warn!(instruction, retry = retries, "retrying multimeter query");
                }
                Err(LineError::Timeout) => {
                    return Err(LineError::RetriesExhausted {
                        command: instruction.to_string(),
                        attempts: retries + 1,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `*IDN?` answer.
    pub fn identity(&mut self) -> Result<String> {
        self.query("*IDN?")
    }

    /// Reset the meter and cycle the port.
    pub fn reset(&mut self) -> Result<()> {
        self.write("*RST")?;
        sleep(self.config.reset_settle);
        self.link.close()?;
        sleep(self.config.reopen_pause);
        self.link.reopen()?;
        self.link.discard()?;
        tracing::debug!(port = %self.port, "multimeter reset");
        Ok(())
    }

    pub fn set_display(&mut self, enabled: bool) -> Result<()> {
        self.write(&format!(":DISPLAY:ENABLE {}", u8::from(enabled)))
    }

    pub fn display_enabled(&mut self) -> Result<bool> {
        let answer = self.query(":DISPLAY:ENABLE?")?;
        Ok(matches!(answer.trim(), "1" | "ON"))
    }

    pub fn set_function(&mut self, function: Function) -> Result<()> {
        self.write(&format!(":FUNCTION {}", function.scpi()))
    }

    pub fn function(&mut self) -> Result<Function> {
        let answer = self.query(":FUNCTION?")?;
        Function::from_reply(&answer).ok_or_else(|| LineError::parse(&answer, "unknown function"))
    }

    pub fn set_integration_rate(&mut self, coupling: Coupling, rate: IntegrationRate) -> Result<()> {
        self.write(&format!("{}:NPLCYCLES {}", coupling.scpi(), rate.cycles()))
    }

    pub fn set_voltage_range(&mut self, coupling: Coupling, range: VoltageRange) -> Result<()> {
        self.write(&format!("{}:RANGE {}", coupling.scpi(), range.volts(coupling)))
    }

    /// Latest reading in the units of the selected function.
    pub fn measure(&mut self) -> Result<f64> {
        let answer = self.query(":FETCH?")?;
        answer
            .trim()
            .parse()
            .map_err(|err: std::num::ParseFloatError| LineError::parse(&answer, err.to_string()))
    }

    pub fn stats(&self) -> LineStats {
        self.stats
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Close the port. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.link.close()
    }
}

impl<C: SerialChannel> Drop for Multimeter<C> {
    fn drop(&mut self) {
        if let Err(err) = self.link.close() {
            tracing::debug!(error = %err, "close on drop failed");
        }
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
