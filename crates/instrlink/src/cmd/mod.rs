use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use instrlink_transport::{
    SerialSettings, SharedSink, SystemPortLocator, TcpSettings, TracingSink, Transport,
    TransportConfig,
};

use crate::exit::{io_error, transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod envinfo;
pub mod locate;
pub mod ports;
pub mod query;
pub mod read;
pub mod send;
pub mod serve;
pub mod version;

/// Fallback for `--config`.
pub const CONFIG_ENV: &str = "INSTRLINK_CONFIG";

/// Response budget for TCP targets when `--timeout` is not given. The TCP
/// `timeout` setting is a per-read interval, not a response budget.
pub const DEFAULT_TCP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a command and print the response frame.
    Query(QueryArgs),
    /// Send a command without waiting for a response.
    Send(SendArgs),
    /// Print terminator-delimited frames as they arrive.
    Read(ReadArgs),
    /// List serial ports.
    Ports(PortsArgs),
    /// Resolve a port location to a device path.
    Locate(LocateArgs),
    /// Run a line-echo TCP fixture.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Query(args) => query::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Read(args) => read::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Locate(args) => locate::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

/// Which instrument to talk to.
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// TCP endpoint.
    #[arg(long, value_name = "HOST:PORT", conflicts_with_all = ["serial", "config"])]
    pub tcp: Option<String>,
    /// Serial device path.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["tcp", "config"])]
    pub serial: Option<String>,
    /// Serial line speed.
    #[arg(long, value_name = "BAUD", requires = "serial")]
    pub baud: Option<u32>,
    /// JSON transport configuration file.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["tcp", "serial"])]
    pub config: Option<PathBuf>,
    /// Response terminator; accepts escapes such as \r\n or \x03.
    #[arg(long, value_name = "SEQ")]
    pub terminator: Option<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Command text; escapes such as \r\n are decoded.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the command bytes from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Label used in traffic logs.
    #[arg(long)]
    pub description: Option<String>,
    /// Response budget (e.g. 3s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Cut the response at this many bytes.
    #[arg(long)]
    pub max_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Command text; escapes such as \r\n are decoded.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the command bytes from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Label used in traffic logs.
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Exit after N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Budget for each frame (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    /// Cut each frame at this many bytes.
    #[arg(long)]
    pub max_size: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct LocateArgs {
    /// Device path, basename, USB serial number, or vid:pid.
    pub location: String,
    /// Enumeration attempts.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,
    /// Pause between attempts (e.g. 1s, 200ms).
    #[arg(long, default_value = "1s")]
    pub delay: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(default_value = "127.0.0.1:5025")]
    pub addr: String,
    /// Line terminator; accepts escapes.
    #[arg(long, default_value = "\\r\\n")]
    pub terminator: String,
    /// Answer every line with this text instead of echoing it.
    #[arg(long)]
    pub reply: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

/// An opened transport plus the budget to use when the caller gave none.
pub struct Target {
    pub transport: Box<dyn Transport + Send>,
    pub default_timeout: Duration,
}

impl TargetArgs {
    /// Turn the flags into a transport configuration.
    pub fn to_config(&self) -> CliResult<TransportConfig> {
        let loaded = if let Some(endpoint) = &self.tcp {
            let (ip, port) = split_endpoint(endpoint)?;
            TransportConfig::from_json_str(&format!(
                r#"{{"type":"tcp","ip":{},"port":{port}}}"#,
                json_string(&ip)
            ))
        } else if let Some(path) = &self.serial {
            TransportConfig::from_json_str(&format!(
                r#"{{"type":"serial","port":{}}}"#,
                json_string(path)
            ))
        } else if let Some(path) = &self.config {
            TransportConfig::from_path(path)
        } else if let Some(path) = std::env::var_os(CONFIG_ENV) {
            TransportConfig::from_path(PathBuf::from(path))
        } else {
            return Err(CliError::new(
                USAGE,
                format!("one of --tcp, --serial or --config (or {CONFIG_ENV}) is required"),
            ));
        };
        let mut config = loaded.map_err(|err| transport_error("invalid target", err))?;

        match &mut config {
            TransportConfig::Serial(SerialSettings {
                baudrate,
                terminator,
                ..
            }) => {
                if let Some(baud) = self.baud {
                    *baudrate = baud;
                }
                if let Some(term) = &self.terminator {
                    *terminator = term.clone();
                }
            }
            TransportConfig::Tcp(TcpSettings { terminator, .. }) => {
                if let Some(term) = &self.terminator {
                    *terminator = term.clone();
                }
            }
        }
        Ok(config)
    }

    /// Resolve, build, and open the target.
    pub fn open(&self) -> CliResult<Target> {
        let mut config = self.to_config()?;
        config
            .resolve(&SystemPortLocator::default())
            .map_err(|err| transport_error("port lookup failed", err))?;

        let default_timeout = match &config {
            TransportConfig::Serial(_) => config
                .timeout()
                .map_err(|err| transport_error("invalid target", err))?,
            TransportConfig::Tcp(_) => DEFAULT_TCP_RESPONSE_TIMEOUT,
        };

        let sink: SharedSink = Arc::new(TracingSink);
        let mut transport = config
            .build(sink)
            .map_err(|err| transport_error("invalid target", err))?;
        transport
            .open()
            .map_err(|err| transport_error("open failed", err))?;
        tracing::debug!(endpoint = %transport.describe(), "target open");

        Ok(Target {
            transport,
            default_timeout,
        })
    }
}

fn split_endpoint(endpoint: &str) -> CliResult<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("expected HOST:PORT, got {endpoint:?}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(CliError::new(USAGE, format!("missing host in {endpoint:?}")));
    }
    let port = port
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid port in {endpoint:?}")))?;
    Ok((host.to_string(), port))
}

fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Command bytes from `--data` (escapes decoded) or `--file` (verbatim).
pub fn resolve_payload(data: Option<&str>, file: Option<&PathBuf>) -> CliResult<Vec<u8>> {
    if let Some(data) = data {
        return Ok(instrlink_frame::unescape(data));
    }
    if let Some(path) = file {
        return std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::new(USAGE, "one of --data or --file is required"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
