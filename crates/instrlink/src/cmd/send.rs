use instrlink_transport::{Command, Transport};

use crate::cmd::{resolve_payload, SendArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(args.data.as_deref(), args.file.as_ref())?;
    let mut target = args.target.open()?;

    let mut command = Command::new(payload);
    if let Some(description) = args.description {
        command = command.describe(description);
    }

    target
        .transport
        .send(&command)
        .map_err(|err| transport_error("send failed", err))?;
    tracing::info!(
        endpoint = %target.transport.describe(),
        bytes = command.bytes.len(),
        "command sent"
    );

    target.transport.close();
    Ok(SUCCESS)
}
