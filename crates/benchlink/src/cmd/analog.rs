use benchlink_line::{AnalogBus, AnalogConfig};
use benchlink_transport::SerialStream;

use crate::cmd::{AnalogAction, AnalogArgs};
use crate::exit::{line_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat};

pub fn run(args: AnalogArgs, format: OutputFormat) -> CliResult<i32> {
    let stream = SerialStream::open(benchlink_line::analog_serial_settings(args.port.as_str()))
        .map_err(|err| transport_error(&format!("cannot open {}", args.port), err))?;
    let config = AnalogConfig {
        channels_per_module: args.channels,
        ..AnalogConfig::default()
    };
    let mut bus = AnalogBus::from_channel(stream, args.modules, config)
        .map_err(|err| line_error("analog bus setup failed", err))?;

    match args.action {
        AnalogAction::Read => {
            let readings = bus
                .read_modules()
                .map_err(|err| line_error("analog read failed", err))?;

            let rows = readings
                .iter()
                .flat_map(|reading| {
                    reading.values.iter().enumerate().map(|(channel, value)| {
                        vec![
                            reading.address.to_string(),
                            channel.to_string(),
                            format!("{value:.2}"),
                        ]
                    })
                })
                .collect();
            print_rows(&readings, &["MODULE", "CHANNEL", "VALUE"], rows, format);
        }
    }

    Ok(SUCCESS)
}
