use instrlink_transport::{PortLocator, SystemPortLocator};
use serde::Serialize;

use crate::cmd::{parse_duration, LocateArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct LocateOutput<'a> {
    location: &'a str,
    port: &'a str,
}

pub fn run(args: LocateArgs, format: OutputFormat) -> CliResult<i32> {
    if args.retries == 0 {
        return Err(CliError::new(USAGE, "--retries must be at least 1"));
    }
    let locator = SystemPortLocator::new(args.retries, parse_duration(&args.delay)?);

    let port = locator.locate(&args.location).ok_or_else(|| {
        CliError::new(
            FAILURE,
            format!(
                "no serial port matches {:?} after {} attempts",
                args.location, args.retries
            ),
        )
    })?;

    match format {
        OutputFormat::Json => {
            let out = LocateOutput {
                location: &args.location,
                port: &port,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => println!("{port}"),
    }
    Ok(SUCCESS)
}
