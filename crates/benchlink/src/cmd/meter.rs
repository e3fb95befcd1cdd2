use std::thread;

use benchlink_line::{Function, LineStats, Multimeter};
use serde::Serialize;

use crate::cmd::{parse_duration, FunctionArgs, MeasureArgs, MeterAction, MeterArgs};
use crate::exit::{line_error, CliResult, SUCCESS};
use crate::output::{print_record, print_rows, OutputFormat};

#[derive(Serialize)]
struct IdentityOutput<'a> {
    port: &'a str,
    identity: String,
}

#[derive(Serialize)]
struct MeasureOutput {
    function: Function,
    readings: Vec<f64>,
    link: LineStats,
}

#[derive(Serialize)]
struct FunctionOutput {
    function: Function,
    scpi: &'static str,
}

pub fn run(args: MeterArgs, format: OutputFormat) -> CliResult<i32> {
    let mut meter = Multimeter::open(args.port.as_str())
        .map_err(|err| line_error(&format!("cannot use multimeter on {}", args.port), err))?;

    let result = match args.action {
        MeterAction::Id => identity(&mut meter, format),
        MeterAction::Measure(measure_args) => measure(&mut meter, &measure_args, format),
        MeterAction::Function(function_args) => function(&mut meter, &function_args, format),
    };

    if let Err(err) = meter.close() {
        tracing::warn!(error = %err, "closing multimeter failed");
    }
    result
}

fn identity(meter: &mut Multimeter, format: OutputFormat) -> CliResult<i32> {
    let identity = meter
        .identity()
        .map_err(|err| line_error("identity query failed", err))?;
    let out = IdentityOutput {
        port: meter.port(),
        identity,
    };
    let fields = [
        ("port", out.port.to_string()),
        ("identity", out.identity.clone()),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}

fn measure(meter: &mut Multimeter, args: &MeasureArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    if let Some(function) = args.function {
        meter
            .set_function(function)
            .map_err(|err| line_error("selecting function failed", err))?;
    }
    let function = meter
        .function()
        .map_err(|err| line_error("function query failed", err))?;

    let mut readings = Vec::with_capacity(args.count);
    for n in 0..args.count {
        if n > 0 && !interval.is_zero() {
            thread::sleep(interval);
        }
        readings.push(
            meter
                .measure()
                .map_err(|err| line_error("measurement failed", err))?,
        );
    }

    let stats = meter.stats();
    if stats.retries > 0 {
        tracing::warn!(retries = stats.retries, "multimeter needed retries");
    }

    let out = MeasureOutput {
        function,
        readings,
        link: stats,
    };
    let rows = out
        .readings
        .iter()
        .enumerate()
        .map(|(n, value)| vec![(n + 1).to_string(), function.to_string(), format!("{value}")])
        .collect();
    print_rows(&out, &["#", "FUNCTION", "VALUE"], rows, format);
    Ok(SUCCESS)
}

fn function(meter: &mut Multimeter, args: &FunctionArgs, format: OutputFormat) -> CliResult<i32> {
    if let Some(function) = args.function {
        meter
            .set_function(function)
            .map_err(|err| line_error("selecting function failed", err))?;
    }
    let function = meter
        .function()
        .map_err(|err| line_error("function query failed", err))?;

    let out = FunctionOutput {
        function,
        scpi: function.scpi(),
    };
    let fields = [
        ("function", out.function.to_string()),
        ("scpi", out.scpi.to_string()),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}
