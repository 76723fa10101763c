//! Bluetooth control through `bluetoothctl`.
//!
//! Everything here blocks and is meant to run inside background tasks.

use crate::error::PopupError;
use crate::services::command::Cmd;
use capy_tasks::CancellationToken;
use log::{debug, info};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PAIR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub struct BluetoothDevice {
    pub mac: String,
    pub name: String,
    pub paired: bool,
    pub connected: bool,
}

impl BluetoothDevice {
    fn new(mac: &str, name: &str) -> Self {
        let name = name.trim();
        Self {
            mac: mac.to_string(),
            name: if name.is_empty() {
                "Unknown Device".to_string()
            } else {
                name.to_string()
            },
            paired: false,
            connected: false,
        }
    }
}

/// Streamed from a running discovery scan.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    Status(String),
    DeviceFound(BluetoothDevice),
}

pub fn is_powered(timeout: Duration) -> Result<bool, PopupError> {
    let output = Cmd::new("bluetoothctl").arg("show").timeout(timeout).run()?;
    Ok(parse_powered(&output.stdout))
}

pub fn set_power(on: bool, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("bluetoothctl")
        .args(["power", if on { "on" } else { "off" }])
        .timeout(timeout)
        .run()?;
    info!("Bluetooth powered {}", if on { "on" } else { "off" });
    Ok(())
}

/// Paired devices with their connection state.
pub fn paired_devices(
    token: &CancellationToken,
    timeout: Duration,
) -> Result<Vec<BluetoothDevice>, PopupError> {
    let output = Cmd::new("bluetoothctl")
        .args(["devices", "Paired"])
        .timeout(timeout)
        .cancel_on(token)
        .run()?;

    let mut devices = Vec::new();
    for line in output.stdout.lines() {
        let Some(mut device) = parse_device_line(line) else {
            continue;
        };
        token.check()?;
        device.paired = true;
        device.connected = is_connected(&device.mac, token, timeout)?;
        devices.push(device);
    }
    Ok(devices)
}

/// Run a discovery scan for `duration`, reporting devices as they show up.
pub fn scan(
    duration: Duration,
    token: &CancellationToken,
    mut on_event: impl FnMut(ScanEvent),
) -> Result<Vec<BluetoothDevice>, PopupError> {
    on_event(ScanEvent::Status("Starting scan...".into()));

    let mut found: Vec<BluetoothDevice> = Vec::new();
    Cmd::new("bluetoothctl")
        .args(["--timeout", &duration.as_secs().to_string(), "scan", "on"])
        .timeout(duration + Duration::from_secs(5))
        .cancel_on(token)
        .stream(|line| {
            let Some(device) = parse_scan_line(line) else {
                return;
            };
            if found.iter().any(|d| d.mac == device.mac) {
                return;
            }
            debug!("Discovered {} ({})", device.name, device.mac);
            found.push(device.clone());
            on_event(ScanEvent::DeviceFound(device));
            on_event(ScanEvent::Status(format!("Found {} devices", found.len())));
        })?;

    Ok(found)
}

pub fn connect(mac: &str) -> Result<(), PopupError> {
    Cmd::new("bluetoothctl")
        .args(["connect", mac])
        .timeout(CONNECT_TIMEOUT)
        .run()?;
    Ok(())
}

pub fn disconnect(mac: &str, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("bluetoothctl")
        .args(["disconnect", mac])
        .timeout(timeout)
        .run()?;
    Ok(())
}

/// Pair, then trust so it reconnects on its own.
pub fn pair(mac: &str, token: &CancellationToken, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("bluetoothctl")
        .args(["pair", mac])
        .timeout(PAIR_TIMEOUT)
        .cancel_on(token)
        .run()?;
    Cmd::new("bluetoothctl")
        .args(["trust", mac])
        .timeout(timeout)
        .run()?;
    Ok(())
}

/// Disconnect (best effort) and unpair.
pub fn remove(mac: &str, timeout: Duration) -> Result<(), PopupError> {
    if let Err(e) = disconnect(mac, timeout) {
        debug!("Disconnect before remove failed: {}", e);
    }
    Cmd::new("bluetoothctl")
        .args(["remove", mac])
        .timeout(timeout)
        .run()?;
    Ok(())
}

fn is_connected(mac: &str, token: &CancellationToken, timeout: Duration) -> Result<bool, PopupError> {
    let output = Cmd::new("bluetoothctl")
        .args(["info", mac])
        .timeout(timeout)
        .cancel_on(token)
        .output()?;
    Ok(output.stdout.contains("Connected: yes"))
}

fn parse_powered(output: &str) -> bool {
    output
        .lines()
        .find(|line| line.contains("Powered:"))
        .is_some_and(|line| line.to_lowercase().contains("yes"))
}

/// `Device AA:BB:CC:DD:EE:FF Name with spaces`
fn parse_device_line(line: &str) -> Option<BluetoothDevice> {
    let mut parts = line.trim().splitn(3, ' ');
    if parts.next()? != "Device" {
        return None;
    }
    let mac = parts.next()?;
    if !is_mac(mac) {
        return None;
    }
    Some(BluetoothDevice::new(mac, parts.next().unwrap_or_default()))
}

/// `[NEW] Device AA:BB:CC:DD:EE:FF Name`, possibly colored.
fn parse_scan_line(line: &str) -> Option<BluetoothDevice> {
    let clean = strip_ansi(line);
    let rest = clean.trim().strip_prefix("[NEW]")?;
    let device = parse_device_line(rest)?;
    // Nameless devices are announced with their address as the name.
    if device.name.replace('-', ":") == device.mac {
        return Some(BluetoothDevice::new(&device.mac, ""));
    }
    Some(device)
}

fn is_mac(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // skip parameters up to the final byte
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        if c != '\u{1}' && c != '\u{2}' && c != '\r' {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_powered() {
        let show = "Controller 00:1A:7D:DA:71:13 (public)\n\tName: capy\n\tPowered: yes\n\tDiscoverable: no\n";
        assert!(parse_powered(show));
        assert!(!parse_powered("Controller 00:1A:7D:DA:71:13\n\tPowered: no\n"));
        assert!(!parse_powered("No default controller available\n"));
    }

    #[test]
    fn test_parse_device_line() {
        let device = parse_device_line("Device 94:DB:56:0A:11:22 WH-1000XM4").unwrap();
        assert_eq!(device.mac, "94:DB:56:0A:11:22");
        assert_eq!(device.name, "WH-1000XM4");

        let spaced = parse_device_line("Device 94:DB:56:0A:11:23 Living Room Speaker").unwrap();
        assert_eq!(spaced.name, "Living Room Speaker");

        assert!(parse_device_line("Controller 94:DB:56:0A:11:22 capy").is_none());
        assert!(parse_device_line("Device not-a-mac name").is_none());
    }

    #[test]
    fn test_parse_scan_line() {
        let colored = "\u{1b}[0;92m[NEW]\u{1b}[0m Device 5C:E9:1E:00:AA:01 Keyboard K380";
        let device = parse_scan_line(colored).unwrap();
        assert_eq!(device.mac, "5C:E9:1E:00:AA:01");
        assert_eq!(device.name, "Keyboard K380");

        let nameless = parse_scan_line("[NEW] Device 5C:E9:1E:00:AA:02 5C-E9-1E-00-AA-02").unwrap();
        assert_eq!(nameless.name, "Unknown Device");

        assert!(parse_scan_line("[CHG] Device 5C:E9:1E:00:AA:01 RSSI: -60").is_none());
        assert!(parse_scan_line("Discovery started").is_none());
    }
}
