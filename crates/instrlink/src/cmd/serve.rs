use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use instrlink_frame::{
    ends_with_terminator, unescape, CommandWriter, FrameConfig, FrameError, FrameReader,
    Terminator,
};
use serde::Serialize;

use crate::cmd::{install_ctrlc_handler, ServeArgs};
use crate::exit::{io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LINE_BUDGET: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct ListeningOutput {
    listening: String,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let terminator = Terminator::parse_escaped(&args.terminator)
        .map_err(|err| CliError::new(USAGE, format!("invalid --terminator: {err}")))?;
    let reply = args
        .reply
        .as_deref()
        .map(|text| reply_bytes(text, &terminator));

    let listener = TcpListener::bind(&args.addr)
        .map_err(|err| io_error(&format!("bind {} failed", args.addr), err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("listener setup failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("listener setup failed", err))?;
    announce(local, format);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "fixture client connected");
                let running = running.clone();
                let terminator = terminator.clone();
                let reply = reply.clone();
                thread::spawn(move || {
                    if let Err(err) = serve_client(stream, &terminator, reply.as_deref(), &running)
                    {
                        tracing::warn!(%peer, error = %err, "fixture client failed");
                    }
                    tracing::info!(%peer, "fixture client disconnected");
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("accept failed", err)),
        }
    }

    Ok(SUCCESS)
}

fn announce(local: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                listening: local.to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            println!("listening on {local}");
        }
    }
    let _ = io::stdout().flush();
    tracing::info!(addr = %local, "fixture listening");
}

/// Answer each terminated line until the client leaves or shutdown starts.
fn serve_client(
    stream: TcpStream,
    terminator: &Terminator,
    reply: Option<&[u8]>,
    running: &AtomicBool,
) -> Result<(), FrameError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_nodelay(true)?;

    let config = FrameConfig {
        read_interval: POLL_INTERVAL,
        ..FrameConfig::default()
    };
    let mut reader = FrameReader::with_config(stream, config.clone());

    while running.load(Ordering::SeqCst) {
        let frame = match reader.read_until(LINE_BUDGET, terminator, None) {
            Ok(frame) => frame,
            Err(FrameError::Timeout(_)) => continue,
            Err(FrameError::ConnectionClosed) => return Ok(()),
            Err(err) => return Err(err),
        };
        tracing::debug!(line = %frame.text_preview(), "fixture line");

        let answer = reply.unwrap_or(frame.as_bytes());
        CommandWriter::with_config(reader.get_mut(), config.clone()).write_bytes(answer)?;
    }
    Ok(())
}

/// Decode `text` and make sure it ends with the line terminator.
fn reply_bytes(text: &str, terminator: &Terminator) -> Vec<u8> {
    let mut bytes = unescape(text);
    if !ends_with_terminator(&bytes, terminator) {
        bytes.extend_from_slice(terminator.as_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn reply_gets_terminator_once() {
        let crlf = Terminator::crlf();
        assert_eq!(reply_bytes("PONG", &crlf), b"PONG\r\n");
        assert_eq!(reply_bytes("PONG\\r\\n", &crlf), b"PONG\r\n");
    }

    #[test]
    fn client_lines_are_echoed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let server_running = running.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_client(stream, &Terminator::lf(), None, &server_running)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client.write_all(b"ONE\nTWO\n").unwrap();

        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        while got.len() < 8 {
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0, "server closed early");
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"ONE\nTWO\n");

        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn fixed_reply_replaces_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let server_running = running.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let reply = reply_bytes("OK", &Terminator::crlf());
            serve_client(stream, &Terminator::crlf(), Some(&reply), &server_running)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client.write_all(b"*RST\r\n").unwrap();

        let mut got = [0u8; 4];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"OK\r\n");

        running.store(false, Ordering::SeqCst);
        server.join().unwrap().unwrap();
    }
}
