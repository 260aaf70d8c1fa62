use instrlink_transport::{Command, Transport};

use crate::cmd::{parse_duration, resolve_payload, QueryArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: QueryArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(args.data.as_deref(), args.file.as_ref())?;
    let mut target = args.target.open()?;
    let timeout = match &args.timeout {
        Some(text) => parse_duration(text)?,
        None => target.default_timeout,
    };

    let mut command = Command::new(payload);
    if let Some(description) = args.description {
        command = command.describe(description);
    }

    let frame = target
        .transport
        .query(&command, timeout, args.max_size)
        .map_err(|err| transport_error("query failed", err))?;
    print_frame(&frame, &target.transport.describe(), format);

    target.transport.close();
    Ok(SUCCESS)
}
