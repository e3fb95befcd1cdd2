use std::time::Duration;

use benchlink_line::{Function, ModuleAddress};
use benchlink_load::Mode;
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod analog;
pub mod load;
pub mod meter;
pub mod ports;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports on this host.
    Ports,
    /// Drive a programmable DC load.
    Load(LoadArgs),
    /// Query an SCPI multimeter.
    Meter(MeterArgs),
    /// Poll analog-input modules.
    Analog(AnalogArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports => ports::run(format),
        Command::Load(args) => load::run(args, format),
        Command::Meter(args) => meter::run(args, format),
        Command::Analog(args) => analog::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    pub conn: LoadConnection,
    #[command(subcommand)]
    pub action: LoadAction,
}

#[derive(Args, Debug)]
pub struct LoadConnection {
    /// Serial port the load is attached to (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, required_unless_present = "simulate")]
    pub port: Option<String>,
    /// Bus address of the load.
    #[arg(long, default_value = "1")]
    pub address: u8,
    /// Talk to an in-process simulated load instead of a serial port.
    #[arg(long, conflicts_with = "port")]
    pub simulate: bool,
    /// How long one attempt waits for a reply (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
    /// Extra attempts after a timed-out or corrupted reply.
    #[arg(long, default_value = "3")]
    pub retries: u32,
}

#[derive(Subcommand, Debug)]
pub enum LoadAction {
    /// Print model, firmware and serial number.
    Info,
    /// Read voltage, current, power and status once.
    Read,
    /// Change limits, mode, setpoints or input state.
    Set(SetArgs),
    /// Sweep a connected panel from open circuit to short circuit.
    Sweep(SweepArgs),
    /// Read values repeatedly until interrupted.
    Monitor(MonitorArgs),
    /// Run a batch of reads and print link statistics.
    Stats(StatsArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Cc,
    Cv,
    Cp,
    Cr,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Cc => Mode::ConstantCurrent,
            ModeArg::Cv => Mode::ConstantVoltage,
            ModeArg::Cp => Mode::ConstantPower,
            ModeArg::Cr => Mode::ConstantResistance,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

#[derive(Args, Debug, Default)]
#[group(required = true, multiple = true)]
pub struct SetArgs {
    /// Maximum input voltage in volts.
    #[arg(long)]
    pub max_voltage: Option<f64>,
    /// Maximum input current in amps.
    #[arg(long)]
    pub max_current: Option<f64>,
    /// Maximum input power in watts.
    #[arg(long)]
    pub max_power: Option<f64>,
    /// Regulation mode.
    #[arg(long)]
    pub mode: Option<ModeArg>,
    /// Constant-current setpoint in amps.
    #[arg(long)]
    pub current: Option<f64>,
    /// Constant-voltage setpoint in volts.
    #[arg(long)]
    pub voltage: Option<f64>,
    /// Constant-power setpoint in watts.
    #[arg(long)]
    pub power: Option<f64>,
    /// Constant-resistance setpoint in ohms.
    #[arg(long)]
    pub resistance: Option<f64>,
    /// Remote voltage sensing.
    #[arg(long)]
    pub remote_sense: Option<Switch>,
    /// Load input state, applied last.
    #[arg(long)]
    pub input: Option<Switch>,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Number of voltage steps between open circuit and zero.
    #[arg(long, default_value = "100")]
    pub steps: usize,
    /// Wait after each setpoint before reading (e.g. 10ms).
    #[arg(long, default_value = "10ms")]
    pub settle: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Time between reads (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after N reads.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Number of value reads to perform first.
    #[arg(long, default_value = "10")]
    pub samples: usize,
}

#[derive(Args, Debug)]
pub struct MeterArgs {
    /// Serial port the multimeter is attached to.
    #[arg(long)]
    pub port: String,
    #[command(subcommand)]
    pub action: MeterAction,
}

#[derive(Subcommand, Debug)]
pub enum MeterAction {
    /// Print the identity string.
    Id,
    /// Take readings.
    Measure(MeasureArgs),
    /// Show or change the measurement function.
    Function(FunctionArgs),
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    /// Select this function before measuring (e.g. voltage-dc).
    #[arg(long)]
    pub function: Option<Function>,
    /// Number of readings.
    #[arg(long, default_value = "1")]
    pub count: usize,
    /// Time between readings (e.g. 500ms).
    #[arg(long, default_value = "0ms")]
    pub interval: String,
}

#[derive(Args, Debug)]
pub struct FunctionArgs {
    /// Function to select. Omit to print the current one.
    pub function: Option<Function>,
}

#[derive(Args, Debug)]
pub struct AnalogArgs {
    /// Serial port of the module bus.
    #[arg(long)]
    pub port: String,
    /// Module addresses, two hex digits each (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub modules: Vec<ModuleAddress>,
    /// Channels reported by each module.
    #[arg(long, default_value = "8")]
    pub channels: usize,
    #[command(subcommand)]
    pub action: AnalogAction,
}

#[derive(Subcommand, Debug)]
pub enum AnalogAction {
    /// Read every channel of every module once.
    Read,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

/// Like [`parse_duration`], but zero is rejected.
pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let timeout = parse_duration(input)?;
    if timeout.is_zero() {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(
            parse_duration("5s").expect("seconds should parse"),
            Duration::from_secs(5)
        );
        assert_eq!(
            parse_duration("2").expect("bare number should parse"),
            Duration::from_secs(2)
        );
        assert_eq!(
            parse_duration("150ms").expect("millis should parse"),
            Duration::from_millis(150)
        );
        assert_eq!(
            parse_duration("0ms").expect("zero settle should parse"),
            Duration::ZERO
        );
    }

    #[test]
    fn parse_duration_invalid() {
        assert_eq!(parse_duration("").expect_err("empty").code, USAGE);
        assert_eq!(parse_duration("bad").expect_err("garbage").code, USAGE);
        assert_eq!(parse_duration("-1s").expect_err("negative").code, USAGE);
    }

    #[test]
    fn parse_timeout_rejects_zero() {
        assert_eq!(parse_timeout("0s").expect_err("zero timeout").code, USAGE);
        assert_eq!(
            parse_timeout("250ms").expect("positive timeout"),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn mode_args_map_to_modes() {
        assert_eq!(Mode::from(ModeArg::Cv), Mode::ConstantVoltage);
        assert_eq!(Mode::from(ModeArg::Cr), Mode::ConstantResistance);
    }
}
