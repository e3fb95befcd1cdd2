use std::fmt;
use std::thread;
use std::time::Duration;

use benchlink_frame::{Payload, PAYLOAD_LEN};
use benchlink_transport::serial::DEFAULT_READ_TIMEOUT;
use benchlink_transport::{SerialChannel, SerialSettings, SerialStream};
use bytes::Buf;
use serde::Serialize;

use crate::command::{byte_payload, flag_payload, Command, Mode};
use crate::engine::{EngineConfig, TransactionEngine};
use crate::error::{LoadError, Result};
use crate::stats::TransactionStats;
use crate::status::DemandState;

/// Baud rate the load's serial interface runs at.
pub const LOAD_BAUD_RATE: u32 = 38_400;

/// Lowest voltage the load accepts as a constant-voltage setpoint.
pub const MIN_CV_VOLTAGE: f64 = 0.1;

/// Default pause between setting a sweep step and reading it.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(10);

const INPUT_ON_BIT: u8 = 1 << 3;

/// Serial settings for a load on `path`: 38400 8N1 with RTS asserted.
pub fn load_serial_settings(path: impl Into<String>) -> SerialSettings {
    SerialSettings::new(path, LOAD_BAUD_RATE)
        .with_rts(true)
        .with_read_timeout(DEFAULT_READ_TIMEOUT)
}

/// Model, firmware and serial number reported by the load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductInfo {
    pub model: String,
    pub firmware: String,
    pub serial_number: String,
}

impl ProductInfo {
    fn from_payload(payload: &Payload) -> Self {
        Self {
            model: ascii_field(&payload[0..5]),
            firmware: format!("{}.{}", payload[8], payload[9]),
            serial_number: ascii_field(&payload[10..20]),
        }
    }
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} firmware {} serial {}",
            self.model, self.firmware, self.serial_number
        )
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// One snapshot of the load's input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Raw operation-state register.
    pub operation_state: u8,
    pub demand: DemandState,
}

impl Reading {
    /// Decode a values reply: u32 mV, u32 0.1 mA, u32 mW, u8 operation
    /// state, u16 demand state, all little-endian.
    pub fn from_payload(payload: &Payload) -> Self {
        let mut src = &payload[..];
        let voltage = f64::from(src.get_u32_le()) / 1_000.0;
        let current = f64::from(src.get_u32_le()) / 10_000.0;
        let power = f64::from(src.get_u32_le()) / 1_000.0;
        let operation_state = src.get_u8();
        let demand = DemandState::decode(src.get_u16_le());

        Self {
            voltage,
            current,
            power,
            operation_state,
            demand,
        }
    }

    /// Whether the load input is switched on.
    pub fn input_on(&self) -> bool {
        self.operation_state & INPUT_ON_BIT != 0
    }
}

/// One point of a panel sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

/// Typed driver for a programmable DC load.
///
/// Opening the driver puts the load under remote control and switches its
/// input off. Every accessor is one [`TransactionEngine::send`].
pub struct ProgrammableLoad<C: SerialChannel = SerialStream> {
    engine: TransactionEngine<C>,
    mode: Option<Mode>,
    last_status: DemandState,
}

impl ProgrammableLoad<SerialStream> {
    /// Open the load on `path` with default settings.
    pub fn open(path: impl Into<String>, address: u8) -> Result<Self> {
        Self::open_with_config(load_serial_settings(path), address, EngineConfig::default())
    }

    pub fn open_with_config(
        settings: SerialSettings,
        address: u8,
        config: EngineConfig,
    ) -> Result<Self> {
        let stream = SerialStream::open(settings)?;
        Self::from_channel(stream, address, config)
    }
}

impl<C: SerialChannel> ProgrammableLoad<C> {
    /// Drive a load over an already-open channel.
    pub fn from_channel(channel: C, address: u8, config: EngineConfig) -> Result<Self> {
        let engine = TransactionEngine::new(channel, address, config)?;
        let mut load = Self {
            engine,
            mode: None,
            last_status: DemandState::default(),
        };

        load.set_remote_operation(true)?;
        load.set_load_on(false)?;
        tracing::info!(address, "programmable load ready");
        Ok(load)
    }

    fn set(&mut self, command: Command, payload: &Payload) -> Result<()> {
        self.engine.send(command, payload)?;
        Ok(())
    }

    fn get(&mut self, command: Command) -> Result<Payload> {
        self.engine.send(command, &[0u8; PAYLOAD_LEN])
    }

    fn set_scaled(&mut self, command: Command, value: f64) -> Result<()> {
        let payload = command.scaled_payload(value)?;
        self.set(command, &payload)
    }

    fn get_scaled(&mut self, command: Command) -> Result<f64> {
        let payload = self.get(command)?;
        Ok(command.scaled_value(&payload))
    }

    pub fn address(&self) -> u8 {
        self.engine.address()
    }

    pub fn product_info(&mut self) -> Result<ProductInfo> {
        let payload = self.get(Command::ProductInfo)?;
        Ok(ProductInfo::from_payload(&payload))
    }

    /// Take (`true`) or release remote control.
    pub fn set_remote_operation(&mut self, remote: bool) -> Result<()> {
        self.set(Command::RemoteOperation, &flag_payload(remote))
    }

    /// Switch the load input on or off.
    pub fn set_load_on(&mut self, on: bool) -> Result<()> {
        self.set(Command::LoadOnOff, &flag_payload(on))
    }

    /// Enable or lock out the front panel.
    pub fn set_local_control(&mut self, enabled: bool) -> Result<()> {
        self.set(Command::LocalControlSet, &flag_payload(enabled))
    }

    pub fn set_max_voltage(&mut self, volts: f64) -> Result<()> {
        self.set_scaled(Command::MaxVoltageSet, volts)
    }

    pub fn max_voltage(&mut self) -> Result<f64> {
        self.get_scaled(Command::MaxVoltageRead)
    }

    pub fn set_max_current(&mut self, amps: f64) -> Result<()> {
        self.set_scaled(Command::MaxCurrentSet, amps)
    }

    pub fn max_current(&mut self) -> Result<f64> {
        self.get_scaled(Command::MaxCurrentRead)
    }

    pub fn set_max_power(&mut self, watts: f64) -> Result<()> {
        self.set_scaled(Command::MaxPowerSet, watts)
    }

    pub fn max_power(&mut self) -> Result<f64> {
        self.get_scaled(Command::MaxPowerRead)
    }

    /// Select the regulation mode. The choice is cached on success.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.set(Command::ModeSet, &byte_payload(mode.to_byte()))?;
        self.mode = Some(mode);
        Ok(())
    }

    /// Last mode set through this driver, without asking the device.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Ask the device for its regulation mode.
    pub fn read_mode(&mut self) -> Result<Mode> {
        let payload = self.get(Command::ModeRead)?;
        Mode::from_byte(payload[0]).ok_or_else(|| LoadError::UnexpectedReply {
            command: Command::ModeRead,
            detail: format!("mode byte {:#04x}", payload[0]),
        })
    }

    pub fn set_current(&mut self, amps: f64) -> Result<()> {
        self.set_scaled(Command::CurrentSet, amps)
    }

    pub fn current_setpoint(&mut self) -> Result<f64> {
        self.get_scaled(Command::CurrentRead)
    }

    /// Constant-voltage setpoint. Values below [`MIN_CV_VOLTAGE`] are raised
    /// to it.
    pub fn set_voltage(&mut self, volts: f64) -> Result<()> {
        let volts = if volts < MIN_CV_VOLTAGE {
            MIN_CV_VOLTAGE
        } else {
            volts
        };
        self.set_scaled(Command::VoltageSet, volts)
    }

    pub fn voltage_setpoint(&mut self) -> Result<f64> {
        self.get_scaled(Command::VoltageRead)
    }

    pub fn set_power(&mut self, watts: f64) -> Result<()> {
        self.set_scaled(Command::PowerSet, watts)
    }

    pub fn power_setpoint(&mut self) -> Result<f64> {
        self.get_scaled(Command::PowerRead)
    }

    /// Constant-resistance setpoint in ohms.
    pub fn set_resistance(&mut self, ohms: f64) -> Result<()> {
        self.set_scaled(Command::ResistanceSet, ohms)
    }

    pub fn resistance_setpoint(&mut self) -> Result<f64> {
        self.get_scaled(Command::ResistanceRead)
    }

    pub fn set_remote_sensing(&mut self, enabled: bool) -> Result<()> {
        self.set(Command::RemoteSenseSet, &flag_payload(enabled))
    }

    pub fn remote_sensing(&mut self) -> Result<bool> {
        let payload = self.get(Command::RemoteSenseRead)?;
        Ok(payload[0] != 0)
    }

    /// Read voltage, current, power and status in one exchange.
    pub fn read_values(&mut self) -> Result<Reading> {
        let payload = self.get(Command::ValuesRead)?;
        let reading = Reading::from_payload(&payload);
        self.last_status = reading.demand;
        if reading.demand.error {
            tracing::warn!(faults = ?reading.demand.faults(), "load reports a fault");
        }
        Ok(reading)
    }

    pub fn read_voltage(&mut self) -> Result<f64> {
        Ok(self.read_values()?.voltage)
    }

    pub fn read_current(&mut self) -> Result<f64> {
        Ok(self.read_values()?.current)
    }

    pub fn read_power(&mut self) -> Result<f64> {
        Ok(self.read_values()?.power)
    }

    /// Demand state from the most recent [`read_values`](Self::read_values).
    pub fn last_status(&self) -> DemandState {
        self.last_status
    }

    /// Whether the most recent reading reported a fault.
    pub fn instrument_error(&self) -> bool {
        self.last_status.error
    }

    /// Sweep a panel's I-V curve.
    ///
    /// Reads the open-circuit voltage with the input off, switches to
    /// constant voltage and steps the setpoint down from Voc in `steps`
    /// equal increments, switching the input on at the first step. Each step
    /// waits `settle` before reading the current. The input is switched off
    /// again afterwards, also when the sweep fails. Points are returned in
    /// ascending voltage order.
    pub fn measure_panel_curve(&mut self, steps: usize, settle: Duration) -> Result<Vec<CurvePoint>> {
        if steps == 0 {
            return Err(LoadError::InvalidValue(
                "a sweep needs at least one step".to_string(),
            ));
        }

        self.set_load_on(false)?;
        let voc = self.read_voltage()?;
        tracing::debug!(voc, steps, "starting panel sweep");
        self.set_mode(Mode::ConstantVoltage)?;

        let mut points = Vec::with_capacity(steps);
        let swept = self.sweep(voc, steps, settle, &mut points);
        let off = self.set_load_on(false);
        swept?;
        off?;

        points.reverse();
        Ok(points)
    }

    fn sweep(
        &mut self,
        voc: f64,
        steps: usize,
        settle: Duration,
        points: &mut Vec<CurvePoint>,
    ) -> Result<()> {
        for step in (1..=steps).rev() {
            let voltage = voc * step as f64 / steps as f64;
            self.set_voltage(voltage)?;
            if step == steps {
                self.set_load_on(true)?;
            }
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            let current = self.read_current()?;
            points.push(CurvePoint {
                voltage,
                current,
                power: voltage * current,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> &TransactionStats {
        self.engine.stats()
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Close the serial channel. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.engine.close()
    }
}

impl<C: SerialChannel> fmt::Debug for ProgrammableLoad<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgrammableLoad")
            .field("engine", &self.engine)
            .field("mode", &self.mode)
            .finish()
    }
}
