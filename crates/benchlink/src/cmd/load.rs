use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use benchlink_load::{
    load_serial_settings, CurvePoint, DemandState, EngineConfig, Mode, ProgrammableLoad, Reading,
    SimulatedLoad,
};
use benchlink_transport::{SerialChannel, SerialStream};
use serde::Serialize;

use crate::cmd::{
    parse_duration, parse_timeout, LoadAction, LoadArgs, LoadConnection, MonitorArgs, SetArgs,
    StatsArgs, SweepArgs,
};
use crate::exit::{load_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_json, print_record, print_rows, quantity, OutputFormat};

type Load = ProgrammableLoad<Box<dyn SerialChannel>>;

#[derive(Serialize)]
struct InfoOutput {
    address: u8,
    model: String,
    firmware: String,
    serial_number: String,
    max_voltage: f64,
    max_current: f64,
    max_power: f64,
    mode: Mode,
    remote_sensing: bool,
}

#[derive(Serialize)]
struct ReadingOutput {
    voltage: f64,
    current: f64,
    power: f64,
    input_on: bool,
    regulation: Option<Mode>,
    faults: Vec<&'static str>,
    demand: DemandState,
}

impl From<Reading> for ReadingOutput {
    fn from(reading: Reading) -> Self {
        Self {
            voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
            input_on: reading.input_on(),
            regulation: reading.demand.regulation(),
            faults: reading.demand.faults(),
            demand: reading.demand,
        }
    }
}

impl ReadingOutput {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("voltage", quantity(self.voltage, "V")),
            ("current", quantity(self.current, "A")),
            ("power", quantity(self.power, "W")),
            ("input", on_off(self.input_on).to_string()),
            (
                "regulation",
                self.regulation
                    .map(|mode| mode.short_name().to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("faults", fault_list(&self.faults)),
        ]
    }
}

pub fn run(args: LoadArgs, format: OutputFormat) -> CliResult<i32> {
    let mut load = open(&args.conn)?;

    let result = match args.action {
        LoadAction::Info => info(&mut load, format),
        LoadAction::Read => read(&mut load, format),
        LoadAction::Set(set_args) => set(&mut load, &set_args, format),
        LoadAction::Sweep(sweep_args) => sweep(&mut load, &sweep_args, format),
        LoadAction::Monitor(monitor_args) => monitor(&mut load, &monitor_args, format),
        LoadAction::Stats(stats_args) => stats(&mut load, &stats_args, format),
    };

    if let Err(err) = load.close() {
        tracing::warn!(error = %err, "closing load failed");
    }
    result
}

fn open(conn: &LoadConnection) -> CliResult<Load> {
    let config = EngineConfig {
        reply_timeout: parse_timeout(&conn.timeout)?,
        retry_budget: conn.retries,
        ..EngineConfig::default()
    };

    let channel: Box<dyn SerialChannel> = if conn.simulate {
        tracing::info!(address = conn.address, "using simulated load");
        Box::new(SimulatedLoad::new(conn.address))
    } else {
        let port = conn
            .port
            .as_deref()
            .ok_or_else(|| CliError::new(USAGE, "--port or --simulate is required"))?;
        let stream = SerialStream::open(load_serial_settings(port))
            .map_err(|err| transport_error(&format!("cannot open {port}"), err))?;
        Box::new(stream)
    };

    ProgrammableLoad::from_channel(channel, conn.address, config)
        .map_err(|err| load_error("load did not respond", err))
}

fn info(load: &mut Load, format: OutputFormat) -> CliResult<i32> {
    let context = "info failed";
    let product = load.product_info().map_err(|err| load_error(context, err))?;
    let out = InfoOutput {
        address: load.address(),
        model: product.model,
        firmware: product.firmware,
        serial_number: product.serial_number,
        max_voltage: load.max_voltage().map_err(|err| load_error(context, err))?,
        max_current: load.max_current().map_err(|err| load_error(context, err))?,
        max_power: load.max_power().map_err(|err| load_error(context, err))?,
        mode: load.read_mode().map_err(|err| load_error(context, err))?,
        remote_sensing: load
            .remote_sensing()
            .map_err(|err| load_error(context, err))?,
    };

    let fields = [
        ("address", out.address.to_string()),
        ("model", out.model.clone()),
        ("firmware", out.firmware.clone()),
        ("serial", out.serial_number.clone()),
        ("max voltage", quantity(out.max_voltage, "V")),
        ("max current", quantity(out.max_current, "A")),
        ("max power", quantity(out.max_power, "W")),
        ("mode", out.mode.short_name().to_string()),
        ("remote sensing", on_off(out.remote_sensing).to_string()),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}

fn read(load: &mut Load, format: OutputFormat) -> CliResult<i32> {
    let reading = load
        .read_values()
        .map_err(|err| load_error("read failed", err))?;
    let out = ReadingOutput::from(reading);
    print_record(&out, &out.fields(), format);
    Ok(SUCCESS)
}

fn set(load: &mut Load, args: &SetArgs, format: OutputFormat) -> CliResult<i32> {
    let context = "set failed";
    let apply = |result: benchlink_load::Result<()>| result.map_err(|err| load_error(context, err));

    if let Some(volts) = args.max_voltage {
        apply(load.set_max_voltage(volts))?;
    }
    if let Some(amps) = args.max_current {
        apply(load.set_max_current(amps))?;
    }
    if let Some(watts) = args.max_power {
        apply(load.set_max_power(watts))?;
    }
    if let Some(mode) = args.mode {
        apply(load.set_mode(mode.into()))?;
    }
    if let Some(amps) = args.current {
        apply(load.set_current(amps))?;
    }
    if let Some(volts) = args.voltage {
        apply(load.set_voltage(volts))?;
    }
    if let Some(watts) = args.power {
        apply(load.set_power(watts))?;
    }
    if let Some(ohms) = args.resistance {
        apply(load.set_resistance(ohms))?;
    }
    if let Some(sense) = args.remote_sense {
        apply(load.set_remote_sensing(sense.is_on()))?;
    }
    if let Some(input) = args.input {
        apply(load.set_load_on(input.is_on()))?;
    }

    read(load, format)
}

fn sweep(load: &mut Load, args: &SweepArgs, format: OutputFormat) -> CliResult<i32> {
    let settle = parse_duration(&args.settle)?;
    let started = Instant::now();
    let points = load
        .measure_panel_curve(args.steps, settle)
        .map_err(|err| load_error("sweep failed", err))?;

    if let Some(peak) = max_power_point(&points) {
        tracing::info!(
            points = points.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            peak_voltage = peak.voltage,
            peak_power = peak.power,
            "sweep complete"
        );
    }

    let rows = points
        .iter()
        .map(|point| {
            vec![
                format!("{:.4}", point.voltage),
                format!("{:.4}", point.current),
                format!("{:.4}", point.power),
            ]
        })
        .collect();
    print_rows(&points, &["VOLTAGE (V)", "CURRENT (A)", "POWER (W)"], rows, format);
    Ok(SUCCESS)
}

fn max_power_point(points: &[CurvePoint]) -> Option<&CurvePoint> {
    points
        .iter()
        .max_by(|a, b| a.power.total_cmp(&b.power))
}

fn monitor(load: &mut Load, args: &MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let reading = load
            .read_values()
            .map_err(|err| load_error("read failed", err))?;
        let out = ReadingOutput::from(reading);
        match format {
            OutputFormat::Json => print_json(&out),
            _ => {
                let values: Vec<String> = out.fields().into_iter().map(|(_, v)| v).collect();
                println!("{}", values.join("  "));
            }
        }

        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        pause(interval, &running);
    }

    Ok(SUCCESS)
}

/// Sleep for `interval`, waking early once `running` is cleared.
fn pause(interval: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}

fn stats(load: &mut Load, args: &StatsArgs, format: OutputFormat) -> CliResult<i32> {
    for _ in 0..args.samples {
        load.read_values()
            .map_err(|err| load_error("read failed", err))?;
    }

    let snapshot = load.stats().snapshot();
    let fields = [
        ("messages sent", snapshot.messages_sent.to_string()),
        ("expected replies", snapshot.expected_replies.to_string()),
        ("received replies", snapshot.received_replies.to_string()),
        ("retries", snapshot.retries.to_string()),
        ("checksum failures", snapshot.checksum_failures.to_string()),
        ("spurious arrivals", snapshot.spurious_arrivals.to_string()),
        ("framing failures", snapshot.framing_failures.to_string()),
    ];
    print_record(&snapshot, &fields, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn fault_list(faults: &[&str]) -> String {
    if faults.is_empty() {
        "none".to_string()
    } else {
        faults.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_power_point_is_selected() {
        let points = [
            CurvePoint {
                voltage: 0.0,
                current: 5.0,
                power: 0.0,
            },
            CurvePoint {
                voltage: 17.0,
                current: 4.5,
                power: 76.5,
            },
            CurvePoint {
                voltage: 21.0,
                current: 0.0,
                power: 0.0,
            },
        ];
        let peak = max_power_point(&points).expect("non-empty sweep has a peak");
        assert_eq!(peak.voltage, 17.0);
        assert!(max_power_point(&[]).is_none());
    }

    #[test]
    fn fault_list_renders_none() {
        assert_eq!(fault_list(&[]), "none");
        assert_eq!(
            fault_list(&["over-voltage", "over-power"]),
            "over-voltage, over-power"
        );
    }

    #[test]
    fn simulated_connection_opens() {
        let conn = LoadConnection {
            port: None,
            address: 1,
            simulate: true,
            timeout: "500ms".to_string(),
            retries: 1,
        };
        let mut load = open(&conn).expect("simulated load should open");
        let reading = load.read_values().expect("simulator should answer");
        assert!(!reading.input_on());
        load.close().expect("close should succeed");
    }

    #[test]
    fn zero_timeout_is_usage_error() {
        let conn = LoadConnection {
            port: None,
            address: 1,
            simulate: true,
            timeout: "0s".to_string(),
            retries: 1,
        };
        let err = open(&conn).expect_err("zero timeout should be rejected");
        assert_eq!(err.code, USAGE);
    }
}
