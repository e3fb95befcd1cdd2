//! The load's command table.
//!
//! Each command maps to a one-byte code, a direction, and the scale used to
//! turn engineering units into the little-endian `u32` carried in the first
//! four payload bytes. Encode and decode both read the scale from here.

use std::fmt;

use benchlink_frame::{Payload, PAYLOAD_LEN};
use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::{LoadError, Result};

/// Whether a command changes device state or reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Set,
    Get,
}

/// Fixed-point representation of a numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Not a scaled quantity (flags, enums, structured replies).
    Raw,
    /// 1/1000 of the unit: mV, mW, mOhm.
    Milli,
    /// 1/10000 of the unit: 0.1 mA.
    TenthMilli,
}

impl Scale {
    pub fn factor(self) -> f64 {
        match self {
            Scale::Raw => 1.0,
            Scale::Milli => 1_000.0,
            Scale::TenthMilli => 10_000.0,
        }
    }

    /// Convert an engineering value to its wire integer, rounding to the
    /// nearest step.
    pub fn to_raw(self, value: f64) -> Result<u32> {
        if !value.is_finite() || value < 0.0 {
            return Err(LoadError::InvalidValue(format!(
                "{value} is not a non-negative finite number"
            )));
        }
        let raw = (value * self.factor()).round();
        if raw > f64::from(u32::MAX) {
            return Err(LoadError::InvalidValue(format!(
                "{value} exceeds the wire range"
            )));
        }
        Ok(raw as u32)
    }

    pub fn from_raw(self, raw: u32) -> f64 {
        f64::from(raw) / self.factor()
    }
}

/// Regulation mode of the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    ConstantCurrent,
    ConstantVoltage,
    ConstantPower,
    ConstantResistance,
}

impl Mode {
    pub fn to_byte(self) -> u8 {
        match self {
            Mode::ConstantCurrent => 0x00,
            Mode::ConstantVoltage => 0x01,
            Mode::ConstantPower => 0x02,
            Mode::ConstantResistance => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Mode::ConstantCurrent),
            0x01 => Some(Mode::ConstantVoltage),
            0x02 => Some(Mode::ConstantPower),
            0x03 => Some(Mode::ConstantResistance),
            _ => None,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Mode::ConstantCurrent => "CC",
            Mode::ConstantVoltage => "CV",
            Mode::ConstantPower => "CP",
            Mode::ConstantResistance => "CR",
        }
    }
}

/// Commands understood by the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Reply-only: reports the outcome of a set command.
    StatusReply,
    RemoteOperation,
    LoadOnOff,
    MaxVoltageSet,
    MaxVoltageRead,
    MaxCurrentSet,
    MaxCurrentRead,
    MaxPowerSet,
    MaxPowerRead,
    ModeSet,
    ModeRead,
    CurrentSet,
    CurrentRead,
    VoltageSet,
    VoltageRead,
    PowerSet,
    PowerRead,
    ResistanceSet,
    ResistanceRead,
    AddressSet,
    LocalControlSet,
    RemoteSenseSet,
    RemoteSenseRead,
    ValuesRead,
    ProductInfo,
}

struct Entry {
    code: u8,
    direction: Direction,
    scale: Scale,
    name: &'static str,
}

const fn entry(code: u8, direction: Direction, scale: Scale, name: &'static str) -> Entry {
    Entry {
        code,
        direction,
        scale,
        name,
    }
}

impl Command {
    pub const ALL: [Command; 25] = [
        Command::StatusReply,
        Command::RemoteOperation,
        Command::LoadOnOff,
        Command::MaxVoltageSet,
        Command::MaxVoltageRead,
        Command::MaxCurrentSet,
        Command::MaxCurrentRead,
        Command::MaxPowerSet,
        Command::MaxPowerRead,
        Command::ModeSet,
        Command::ModeRead,
        Command::CurrentSet,
        Command::CurrentRead,
        Command::VoltageSet,
        Command::VoltageRead,
        Command::PowerSet,
        Command::PowerRead,
        Command::ResistanceSet,
        Command::ResistanceRead,
        Command::AddressSet,
        Command::LocalControlSet,
        Command::RemoteSenseSet,
        Command::RemoteSenseRead,
        Command::ValuesRead,
        Command::ProductInfo,
    ];

    fn entry(self) -> Entry {
        use Direction::{Get, Set};
        use Scale::{Milli, Raw, TenthMilli};

        match self {
            Command::StatusReply => entry(0x12, Get, Raw, "status-reply"),
            Command::RemoteOperation => entry(0x20, Set, Raw, "remote-operation"),
            Command::LoadOnOff => entry(0x21, Set, Raw, "load-on-off"),
            Command::MaxVoltageSet => entry(0x22, Set, Milli, "max-voltage-set"),
            Command::MaxVoltageRead => entry(0x23, Get, Milli, "max-voltage-read"),
            Command::MaxCurrentSet => entry(0x24, Set, TenthMilli, "max-current-set"),
            Command::MaxCurrentRead => entry(0x25, Get, TenthMilli, "max-current-read"),
            Command::MaxPowerSet => entry(0x26, Set, Milli, "max-power-set"),
            Command::MaxPowerRead => entry(0x27, Get, Milli, "max-power-read"),
            Command::ModeSet => entry(0x28, Set, Raw, "mode-set"),
            Command::ModeRead => entry(0x29, Get, Raw, "mode-read"),
            Command::CurrentSet => entry(0x2A, Set, TenthMilli, "cc-current-set"),
            Command::CurrentRead => entry(0x2B, Get, TenthMilli, "cc-current-read"),
            Command::VoltageSet => entry(0x2C, Set, Milli, "cv-voltage-set"),
            Command::VoltageRead => entry(0x2D, Get, Milli, "cv-voltage-read"),
            Command::PowerSet => entry(0x2E, Set, Milli, "cp-power-set"),
            Command::PowerRead => entry(0x2F, Get, Milli, "cp-power-read"),
            Command::ResistanceSet => entry(0x30, Set, Milli, "cr-resistance-set"),
            Command::ResistanceRead => entry(0x31, Get, Milli, "cr-resistance-read"),
            Command::AddressSet => entry(0x54, Set, Raw, "address-set"),
            Command::LocalControlSet => entry(0x55, Set, Raw, "local-control-set"),
            Command::RemoteSenseSet => entry(0x56, Set, Raw, "remote-sense-set"),
            Command::RemoteSenseRead => entry(0x57, Get, Raw, "remote-sense-read"),
            Command::ValuesRead => entry(0x5F, Get, Raw, "values-read"),
            Command::ProductInfo => entry(0x6A, Get, Raw, "product-info"),
        }
    }

    /// One-byte wire code.
    pub fn code(self) -> u8 {
        self.entry().code
    }

    pub fn direction(self) -> Direction {
        self.entry().direction
    }

    pub fn scale(self) -> Scale {
        self.entry().scale
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Look up a command by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.code() == code)
    }

    /// Encode a scaled quantity for this command.
    pub fn scaled_payload(self, value: f64) -> Result<Payload> {
        let raw = self.scale().to_raw(value)?;
        Ok(u32_payload(raw))
    }

    /// Decode the scaled quantity in a reply to this command.
    pub fn scaled_value(self, payload: &Payload) -> f64 {
        let mut src = &payload[..];
        self.scale().from_raw(src.get_u32_le())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.code())
    }
}

/// Payload carrying one little-endian `u32`.
pub fn u32_payload(raw: u32) -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    (&mut payload[..]).put_u32_le(raw);
    payload
}

/// Payload carrying a single byte.
pub fn byte_payload(byte: u8) -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[0] = byte;
    payload
}

/// Payload carrying an on/off flag.
pub fn flag_payload(on: bool) -> Payload {
    byte_payload(u8::from(on))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn codes_are_unique_and_resolve_back() {
        let mut seen = HashSet::new();
        for command in Command::ALL {
            assert!(seen.insert(command.code()), "duplicate code for {command}");
            assert_eq!(Command::from_code(command.code()), Some(command));
        }
        assert_eq!(Command::from_code(0xFF), None);
    }

    #[test]
    fn set_and_read_pairs_share_scale() {
        let pairs = [
            (Command::MaxVoltageSet, Command::MaxVoltageRead),
            (Command::MaxCurrentSet, Command::MaxCurrentRead),
            (Command::MaxPowerSet, Command::MaxPowerRead),
            (Command::CurrentSet, Command::CurrentRead),
            (Command::VoltageSet, Command::VoltageRead),
            (Command::PowerSet, Command::PowerRead),
            (Command::ResistanceSet, Command::ResistanceRead),
        ];
        for (set, get) in pairs {
            assert_eq!(set.scale(), get.scale());
            assert_eq!(set.direction(), Direction::Set);
            assert_eq!(get.direction(), Direction::Get);
            assert_eq!(get.code(), set.code() + 1);
        }
    }

    #[test]
    fn max_voltage_is_encoded_in_millivolts() {
        let payload = Command::MaxVoltageSet.scaled_payload(12.345).unwrap();
        assert_eq!(&payload[..4], &12_345u32.to_le_bytes());
        assert!(payload[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn current_uses_tenth_milliamp_steps() {
        let payload = Command::CurrentSet.scaled_payload(1.5).unwrap();
        assert_eq!(&payload[..4], &15_000u32.to_le_bytes());
        assert_eq!(Command::CurrentRead.scaled_value(&payload), 1.5);
    }

    #[test]
    fn scaled_value_reads_little_endian() {
        let payload = u32_payload(0x0001_0203);
        assert_eq!(&payload[..4], &[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(Command::MaxPowerRead.scaled_value(&payload), 66_051.0 / 1_000.0);
    }

    #[test]
    fn rejects_unrepresentable_values() {
        assert!(Scale::Milli.to_raw(-0.001).is_err());
        assert!(Scale::Milli.to_raw(f64::NAN).is_err());
        assert!(Scale::Milli.to_raw(f64::INFINITY).is_err());
        assert!(Scale::TenthMilli.to_raw(1e9).is_err());
        assert_eq!(Scale::Raw.to_raw(0.0).unwrap(), 0);
    }

    #[test]
    fn mode_bytes_roundtrip() {
        for mode in [
            Mode::ConstantCurrent,
            Mode::ConstantVoltage,
            Mode::ConstantPower,
            Mode::ConstantResistance,
        ] {
            assert_eq!(Mode::from_byte(mode.to_byte()), Some(mode));
        }
        assert_eq!(Mode::from_byte(0x04), None);
    }

    #[test]
    fn flag_payload_sets_first_byte() {
        assert_eq!(flag_payload(true)[0], 1);
        assert_eq!(flag_payload(false), [0u8; PAYLOAD_LEN]);
    }

    #[test]
    fn display_names_code() {
        assert_eq!(Command::ValuesRead.to_string(), "values-read (0x5f)");
    }
}
