//! Serial port discovery.
//!
//! Lookup is best-effort: a location that matches nothing yields `None`,
//! never an error.

use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// Default number of enumeration attempts made by [`SystemPortLocator`].
pub const DEFAULT_LOCATE_RETRIES: u32 = 3;
/// Default pause between enumeration attempts.
pub const DEFAULT_LOCATE_DELAY: Duration = Duration::from_secs(1);

/// An enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// `vid:pid` in lowercase hex, for USB ports.
    pub fn usb_id(&self) -> Option<String> {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => Some(format!("{vid:04x}:{pid:04x}")),
            _ => None,
        }
    }

    /// Whether `location` names this port.
    ///
    /// Accepts the device path, the basename of the path, the USB serial
    /// number, or a `vid:pid` pair (hex, case-insensitive).
    pub fn matches_location(&self, location: &str) -> bool {
        let location = location.trim();
        if location.is_empty() {
            return false;
        }
        if self.name == location || basename(&self.name) == location {
            return true;
        }
        if self.serial_number.as_deref() == Some(location) {
            return true;
        }
        self.usb_id()
            .is_some_and(|id| id.eq_ignore_ascii_case(location))
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Orders ttyACM ports first, then ttyUSB, then everything else; numeric
/// suffixes compare as numbers.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let base = basename(name);
    if let Some(rest) = base.strip_prefix("ttyACM") {
        return (0, rest.parse().unwrap_or(usize::MAX), base.to_string());
    }
    if let Some(rest) = base.strip_prefix("ttyUSB") {
        return (1, rest.parse().unwrap_or(usize::MAX), base.to_string());
    }
    (2, 0, base.to_string())
}

fn sorted(ports: impl IntoIterator<Item = PortInfo>) -> Vec<PortInfo> {
    let mut by_name: HashMap<String, PortInfo> = HashMap::new();
    for port in ports {
        by_name.entry(port.name.clone()).or_insert(port);
    }
    let mut ports: Vec<PortInfo> = by_name.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Enumerate serial ports in a deterministic order.
///
/// On Linux, `/dev/ttyACM*` and `/dev/ttyUSB*` nodes the OS enumeration
/// missed are appended without USB details.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(err) => {
            warn!(error = %err, "serial port enumeration failed");
            Vec::new()
        }
    };

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("ttyACM") || name.starts_with("ttyUSB") {
                    ports.push(PortInfo::bare(format!("/dev/{name}")));
                }
            }
        }
    }

    sorted(ports)
}

/// Resolves a physical location to a device path.
pub trait PortLocator {
    fn locate(&self, location: &str) -> Option<String>;
}

/// Searches the ports the OS reports, retrying while a device enumerates.
#[derive(Debug, Clone)]
pub struct SystemPortLocator {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for SystemPortLocator {
    fn default() -> Self {
        Self {
            retries: DEFAULT_LOCATE_RETRIES,
            retry_delay: DEFAULT_LOCATE_DELAY,
        }
    }
}

impl SystemPortLocator {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// Run the retry loop against an arbitrary enumeration.
    pub fn locate_with<F>(&self, location: &str, mut enumerate: F) -> Option<String>
    where
        F: FnMut() -> Vec<PortInfo>,
    {
        for attempt in 1..=self.retries {
            if let Some(port) = enumerate()
                .into_iter()
                .find(|port| port.matches_location(location))
            {
                debug!(location, port = %port.name, attempt, "port located");
                return Some(port.name);
            }
            if attempt < self.retries {
                thread::sleep(self.retry_delay);
            }
        }
        debug!(location, retries = self.retries, "port not found");
        None
    }
}

impl PortLocator for SystemPortLocator {
    fn locate(&self, location: &str) -> Option<String> {
        self.locate_with(location, list_ports)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn usb(name: &str, vid: u16, pid: u16, serial: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            manufacturer: None,
            product: None,
            serial_number: Some(serial.to_string()),
        }
    }

    #[test]
    fn sorting_prefers_acm_then_usb_numerically() {
        let ports = sorted(
            ["/dev/ttyS0", "/dev/ttyUSB10", "/dev/ttyACM1", "/dev/ttyUSB2", "/dev/ttyACM0"]
                .into_iter()
                .map(|n| PortInfo::bare(n.to_string())),
        );
        let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyUSB2",
                "/dev/ttyUSB10",
                "/dev/ttyS0"
            ]
        );
    }

    #[test]
    fn duplicates_keep_first_entry() {
        let ports = sorted([
            usb("/dev/ttyACM0", 0x2341, 0x0043, "A1"),
            PortInfo::bare("/dev/ttyACM0".to_string()),
        ]);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].vid, Some(0x2341));
    }

    #[test]
    fn location_matching() {
        let port = usb("/dev/ttyUSB0", 0x0403, 0x6001, "FT12AB");
        assert!(port.matches_location("/dev/ttyUSB0"));
        assert!(port.matches_location("ttyUSB0"));
        assert!(port.matches_location("FT12AB"));
        assert!(port.matches_location("0403:6001"));
        assert!(port.matches_location("0403:6001".to_uppercase().as_str()));
        assert!(!port.matches_location("ttyUSB1"));
        assert!(!port.matches_location(""));
        assert_eq!(port.usb_id().as_deref(), Some("0403:6001"));
    }

    #[test]
    fn locator_retries_until_device_appears() {
        let locator = SystemPortLocator::new(3, Duration::ZERO);
        let calls = Cell::new(0);
        let found = locator.locate_with("SN42", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Vec::new()
            } else {
                vec![usb("/dev/ttyACM3", 1, 2, "SN42")]
            }
        });
        assert_eq!(found.as_deref(), Some("/dev/ttyACM3"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn locator_gives_up_after_retries() {
        let locator = SystemPortLocator::new(2, Duration::ZERO);
        let calls = Cell::new(0);
        let found = locator.locate_with("nowhere", || {
            calls.set(calls.get() + 1);
            vec![PortInfo::bare("/dev/ttyS0".to_string())]
        });
        assert_eq!(found, None);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn default_locator_matches_legacy_retry_policy() {
        let locator = SystemPortLocator::default();
        assert_eq!(locator.retries, 3);
        assert_eq!(locator.retry_delay, Duration::from_secs(1));
    }
}
