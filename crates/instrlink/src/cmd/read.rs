use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use instrlink_transport::{Transport, TransportError};

use crate::cmd::{install_ctrlc_handler, parse_duration, ReadArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mut target = args.target.open()?;
    let endpoint = target.transport.describe();
    let terminator = target.transport.terminator().clone();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let frame = match target
            .transport
            .read_until(timeout, &terminator, args.max_size)
        {
            Ok(frame) => frame,
            Err(TransportError::Timeout(_)) => continue,
            Err(err) => return Err(transport_error("read failed", err)),
        };

        print_frame(&frame, &endpoint, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    target.transport.close();
    Ok(SUCCESS)
}
