use benchlink_transport::available_ports;
use serde::Serialize;

use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat};

#[derive(Serialize)]
struct PortOutput {
    name: String,
    kind: &'static str,
    product: Option<String>,
}

pub fn run(format: OutputFormat) -> CliResult<i32> {
    let ports: Vec<PortOutput> = available_ports()
        .map_err(|err| transport_error("port enumeration failed", err))?
        .into_iter()
        .map(|port| PortOutput {
            name: port.name,
            kind: port.kind,
            product: port.product,
        })
        .collect();

    tracing::debug!(count = ports.len(), "enumerated serial ports");

    let rows = ports
        .iter()
        .map(|port| {
            vec![
                port.name.clone(),
                port.kind.to_string(),
                port.product.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_rows(&ports, &["PORT", "KIND", "PRODUCT"], rows, format);
    Ok(SUCCESS)
}
