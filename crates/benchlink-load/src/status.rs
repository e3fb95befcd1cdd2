use std::fmt;

use serde::Serialize;

use crate::command::Mode;

/// First payload byte of a status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    CommandOk,
    ChecksumIncorrect,
    ParameterIncorrect,
    UnrecognizedCommand,
    InvalidCommand,
    /// A status byte outside the documented set.
    Unknown(u8),
}

impl StatusCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x80 => StatusCode::CommandOk,
            0x90 => StatusCode::ChecksumIncorrect,
            0xA0 => StatusCode::ParameterIncorrect,
            0xB0 => StatusCode::UnrecognizedCommand,
            0xC0 => StatusCode::InvalidCommand,
            other => StatusCode::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            StatusCode::CommandOk => 0x80,
            StatusCode::ChecksumIncorrect => 0x90,
            StatusCode::ParameterIncorrect => 0xA0,
            StatusCode::UnrecognizedCommand => 0xB0,
            StatusCode::InvalidCommand => 0xC0,
            StatusCode::Unknown(byte) => byte,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::CommandOk => f.write_str("command OK"),
            StatusCode::ChecksumIncorrect => f.write_str("checksum incorrect"),
            StatusCode::ParameterIncorrect => f.write_str("parameter incorrect"),
            StatusCode::UnrecognizedCommand => f.write_str("unrecognized command"),
            StatusCode::InvalidCommand => f.write_str("invalid command"),
            StatusCode::Unknown(byte) => write!(f, "unknown status {byte:#04x}"),
        }
    }
}

/// Conditions reported in the demand-state register of a values reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DemandState {
    pub reversed_voltage: bool,
    pub over_voltage: bool,
    pub over_power: bool,
    pub over_temperature: bool,
    pub remote_sense_disconnected: bool,
    pub constant_current: bool,
    pub constant_voltage: bool,
    pub constant_power: bool,
    pub constant_resistance: bool,
    /// Any of the five fault conditions is present.
    pub error: bool,
}

impl DemandState {
    /// Decode the register, least significant bit first.
    pub fn decode(bits: u16) -> Self {
        let bit = |n: u16| (bits >> n) & 1 != 0;

        let reversed_voltage = bit(0);
        let over_voltage = bit(1);
        let over_power = bit(2);
        let over_temperature = bit(3);
        let remote_sense_disconnected = bit(4);

        Self {
            reversed_voltage,
            over_voltage,
            over_power,
            over_temperature,
            remote_sense_disconnected,
            constant_current: bit(5),
            constant_voltage: bit(6),
            constant_power: bit(7),
            constant_resistance: bit(8),
            error: reversed_voltage
                || over_voltage
                || over_power
                || over_temperature
                || remote_sense_disconnected,
        }
    }

    /// Regulation mode the load reports being in, if any.
    pub fn regulation(&self) -> Option<Mode> {
        if self.constant_current {
            Some(Mode::ConstantCurrent)
        } else if self.constant_voltage {
            Some(Mode::ConstantVoltage)
        } else if self.constant_power {
            Some(Mode::ConstantPower)
        } else if self.constant_resistance {
            Some(Mode::ConstantResistance)
        } else {
            None
        }
    }

    /// Names of the fault conditions currently set.
    pub fn faults(&self) -> Vec<&'static str> {
        [
            (self.reversed_voltage, "reversed-voltage"),
            (self.over_voltage, "over-voltage"),
            (self.over_power, "over-power"),
            (self.over_temperature, "over-temperature"),
            (self.remote_sense_disconnected, "remote-sense-disconnected"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}
