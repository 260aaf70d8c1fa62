use instrlink_transport::list_ports;

use crate::cmd::PortsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports();
    tracing::debug!(count = ports.len(), "serial ports enumerated");
    print_ports(&ports, format);
    Ok(SUCCESS)
}
