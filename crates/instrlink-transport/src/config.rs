//! Declarative transport configuration.
//!
//! A JSON document selects the transport kind with a `"type"` tag and uses
//! the same keys instrument setup files have always carried:
//!
//! ```json
//! { "type": "serial", "port": "/dev/ttyUSB0", "baudrate": 115200, "timeout": 3000 }
//! { "type": "tcp", "ip": "10.0.0.5", "port": 1110, "timeout": 0.2, "terminator": "\r\n" }
//! ```
//!
//! Serial `timeout` is in milliseconds; TCP `timeout` is in seconds. Both,
//! like `baudrate`, accept a number or a numeric string. Terminators accept escape sequences
//! such as `\\r\\n`.

use std::path::Path;
use std::time::Duration;

use instrlink_frame::Terminator;
use serde::{Deserialize, Deserializer, Serialize};

use crate::discovery::PortLocator;
use crate::error::{Result, TransportError};
use crate::serial::{
    SerialConfig, SerialTransport, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL,
    DEFAULT_SERIAL_TIMEOUT,
};
use crate::sink::SharedSink;
use crate::tcp::{TcpConfig, TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::traits::Transport;

/// Which transport to build, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path. Required unless `location` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Physical location resolved through a [`PortLocator`] at build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default = "default_baudrate", deserialize_with = "baudrate")]
    pub baudrate: u32,
    /// Response budget in milliseconds.
    #[serde(default = "default_serial_timeout", deserialize_with = "number")]
    pub timeout: f64,
    #[serde(default = "default_lf")]
    pub terminator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub ip: String,
    pub port: u16,
    /// Per-read timeout in seconds.
    #[serde(default = "default_tcp_timeout", deserialize_with = "number")]
    pub timeout: f64,
    #[serde(default = "default_crlf")]
    pub terminator: String,
    /// Connect timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<f64>,
    #[serde(default = "default_true")]
    pub keepalive: bool,
}

fn default_baudrate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_serial_timeout() -> f64 {
    DEFAULT_SERIAL_TIMEOUT.as_millis() as f64
}

fn default_tcp_timeout() -> f64 {
    DEFAULT_READ_TIMEOUT.as_secs_f64()
}

fn default_lf() -> String {
    "\n".to_string()
}

fn default_crlf() -> String {
    "\r\n".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn number<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {text:?}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntegerOrText {
    Integer(u32),
    Text(String),
}

fn baudrate<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match IntegerOrText::deserialize(deserializer)? {
        IntegerOrText::Integer(n) => Ok(n),
        IntegerOrText::Text(text) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("expected a whole baud rate, got {text:?}"))
        }),
    }
}

fn duration(value: f64, unit_secs: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value * unit_secs)
        .map_err(|_| TransportError::Config(format!("{field} must be a finite non-negative number")))
}

fn terminator(text: &str) -> Result<Terminator> {
    Terminator::parse_escaped(text)
        .map_err(|_| TransportError::Config("terminator must not be empty".to_string()))
}

impl SerialSettings {
    /// Convert to a [`SerialConfig`]. Fails if no device path is set.
    pub fn to_config(&self) -> Result<SerialConfig> {
        let port = self.port.clone().ok_or_else(|| {
            TransportError::Config("serial config needs a `port` or a resolvable `location`".to_string())
        })?;
        if self.baudrate == 0 {
            return Err(TransportError::Config("baudrate must be positive".to_string()));
        }
        let poll_interval = self
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(TransportError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(SerialConfig {
            port,
            baud_rate: self.baudrate,
            timeout: duration(self.timeout, 1e-3, "timeout")?,
            terminator: terminator(&self.terminator)?,
            poll_interval,
        })
    }
}

impl TcpSettings {
    pub fn to_config(&self) -> Result<TcpConfig> {
        if self.ip.trim().is_empty() {
            return Err(TransportError::Config("tcp config needs an `ip`".to_string()));
        }
        let timeout = duration(self.timeout, 1.0, "timeout")?;
        if timeout.is_zero() {
            return Err(TransportError::Config("timeout must be positive".to_string()));
        }
        let connect_timeout = match self.connect_timeout {
            Some(secs) => duration(secs, 1.0, "connect_timeout")?,
            None => DEFAULT_CONNECT_TIMEOUT,
        };
        if connect_timeout.is_zero() {
            return Err(TransportError::Config(
                "connect_timeout must be positive".to_string(),
            ));
        }

        Ok(TcpConfig {
            host: self.ip.clone(),
            port: self.port,
            timeout,
            terminator: terminator(&self.terminator)?,
            connect_timeout,
            keepalive: self.keepalive,
        })
    }
}

impl TransportConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| TransportError::Config(err.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            TransportError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Fill in a serial `port` from its `location`. A no-op for TCP configs
    /// and for serial configs that already name a port.
    pub fn resolve(&mut self, locator: &dyn PortLocator) -> Result<()> {
        let TransportConfig::Serial(settings) = self else {
            return Ok(());
        };
        if settings.port.is_some() {
            return Ok(());
        }
        let Some(location) = settings.location.as_deref() else {
            return Ok(());
        };
        let port = locator.locate(location).ok_or_else(|| {
            TransportError::Config(format!("no serial port found at location {location:?}"))
        })?;
        settings.port = Some(port);
        Ok(())
    }

    /// The configured response budget: the serial `timeout`, or the TCP
    /// per-read timeout.
    pub fn timeout(&self) -> Result<Duration> {
        match self {
            TransportConfig::Serial(s) => duration(s.timeout, 1e-3, "timeout"),
            TransportConfig::Tcp(t) => duration(t.timeout, 1.0, "timeout"),
        }
    }

    /// Build a closed transport.
    pub fn build(&self, sink: SharedSink) -> Result<Box<dyn Transport + Send>> {
        Ok(match self {
            TransportConfig::Serial(settings) => {
                Box::new(SerialTransport::with_sink(settings.to_config()?, sink))
            }
            TransportConfig::Tcp(settings) => {
                Box::new(TcpTransport::with_sink(settings.to_config()?, sink))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use crate::sink::noop;

    struct FixedLocator(Option<&'static str>);

    impl PortLocator for FixedLocator {
        fn locate(&self, _location: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn serial_defaults_follow_legacy_driver() {
        let config =
            TransportConfig::from_json_str(r#"{"type":"serial","port":"/dev/ttyUSB0"}"#).unwrap();
        let TransportConfig::Serial(settings) = &config else {
            panic!("expected serial config");
        };
        let serial = settings.to_config().unwrap();
        assert_eq!(serial.baud_rate, 115_200);
        assert_eq!(serial.timeout, Duration::from_millis(3000));
        assert_eq!(serial.terminator, Terminator::lf());
        assert_eq!(serial.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn serial_timeout_accepts_string() {
        let config = TransportConfig::from_json_str(
            r#"{"type":"serial","port":"COM3","timeout":"1500","baudrate":9600}"#,
        )
        .unwrap();
        let TransportConfig::Serial(settings) = config else {
            panic!("expected serial config");
        };
        let serial = settings.to_config().unwrap();
        assert_eq!(serial.timeout, Duration::from_millis(1500));
        assert_eq!(serial.baud_rate, 9600);
    }

    #[test]
    fn serial_baudrate_accepts_string() {
        let config =
            TransportConfig::from_json_str(r#"{"type":"serial","port":"COM3","baudrate":"115200"}"#)
                .unwrap();
        let TransportConfig::Serial(settings) = config else {
            panic!("expected serial config");
        };
        assert_eq!(settings.baudrate, 115_200);

        let err = TransportConfig::from_json_str(
            r#"{"type":"serial","port":"COM3","baudrate":"fast"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn tcp_defaults_and_escaped_terminator() {
        let config = TransportConfig::from_json_str(
            r#"{"type":"tcp","ip":"10.0.0.5","port":1110,"terminator":"\\r\\n"}"#,
        )
        .unwrap();
        let TransportConfig::Tcp(settings) = &config else {
            panic!("expected tcp config");
        };
        let tcp = settings.to_config().unwrap();
        assert_eq!(tcp.host, "10.0.0.5");
        assert_eq!(tcp.port, 1110);
        assert_eq!(tcp.timeout, Duration::from_millis(200));
        assert_eq!(tcp.terminator, Terminator::crlf());
        assert_eq!(tcp.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(tcp.keepalive);
    }

    #[test]
    fn invalid_configs_are_config_errors() {
        for text in [
            r#"{"type":"usb","port":"x"}"#,
            r#"{"type":"tcp","port":1110}"#,
            r#"{"type":"tcp","ip":"h","port":1,"timeout":"soon"}"#,
            "not json",
        ] {
            let err = TransportConfig::from_json_str(text).unwrap_err();
            assert!(matches!(err, TransportError::Config(_)), "{text}");
        }

        let empty_term =
            TransportConfig::from_json_str(r#"{"type":"tcp","ip":"h","port":1,"terminator":""}"#)
                .unwrap();
        assert!(matches!(
            empty_term.build(noop()),
            Err(TransportError::Config(_))
        ));

        let negative =
            TransportConfig::from_json_str(r#"{"type":"tcp","ip":"h","port":1,"timeout":-1}"#)
                .unwrap();
        assert!(matches!(negative.build(noop()), Err(TransportError::Config(_))));

        let portless = TransportConfig::from_json_str(r#"{"type":"serial"}"#).unwrap();
        assert!(matches!(portless.build(noop()), Err(TransportError::Config(_))));
    }

    #[test]
    fn resolve_fills_port_from_location() {
        let mut config =
            TransportConfig::from_json_str(r#"{"type":"serial","location":"1-1.2"}"#).unwrap();
        config.resolve(&FixedLocator(Some("/dev/ttyACM0"))).unwrap();
        let TransportConfig::Serial(settings) = &config else {
            panic!("expected serial config");
        };
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyACM0"));

        let mut missing =
            TransportConfig::from_json_str(r#"{"type":"serial","location":"1-1.2"}"#).unwrap();
        assert!(missing.resolve(&FixedLocator(None)).is_err());
    }

    #[test]
    fn explicit_port_wins_over_location() {
        let mut config = TransportConfig::from_json_str(
            r#"{"type":"serial","port":"/dev/ttyS1","location":"1-1.2"}"#,
        )
        .unwrap();
        config.resolve(&FixedLocator(Some("/dev/ttyACM0"))).unwrap();
        let TransportConfig::Serial(settings) = &config else {
            panic!("expected serial config");
        };
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyS1"));
    }

    #[test]
    fn build_returns_closed_transport_of_right_kind() {
        let tcp = TransportConfig::from_json_str(r#"{"type":"tcp","ip":"127.0.0.1","port":9}"#)
            .unwrap()
            .build(noop())
            .unwrap();
        assert_eq!(tcp.kind(), TransportKind::Tcp);
        assert!(!tcp.is_open());
        assert_eq!(tcp.describe(), "127.0.0.1:9");

        let serial = TransportConfig::from_json_str(r#"{"type":"serial","port":"/dev/ttyS9"}"#)
            .unwrap()
            .build(noop())
            .unwrap();
        assert_eq!(serial.kind(), TransportKind::Serial);
        assert_eq!(serial.describe(), "/dev/ttyS9@115200");
    }

    #[test]
    fn from_path_reads_file() {
        let path = std::env::temp_dir().join(format!(
            "instrlink-config-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&path, r#"{"type":"tcp","ip":"localhost","port":5025}"#).unwrap();
        let config = TransportConfig::from_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(config, TransportConfig::Tcp(ref t) if t.port == 5025));

        let err = TransportConfig::from_path("/nonexistent/instrlink.json").unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }
}
