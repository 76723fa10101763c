//! Network control through NetworkManager's `nmcli`.
//!
//! Terse (`-t`) output is used everywhere; fields are `:`-separated with
//! literal colons escaped as `\:`.

use crate::error::PopupError;
use crate::services::command::{Cmd, spawn_detached};
use capy_tasks::CancellationToken;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Duration;

const WIFI_TYPE: &str = "802-11-wireless";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Radio switches.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RadioStatus {
    pub wifi_enabled: bool,
    pub airplane_mode: bool,
}

/// Current wifi connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveConnection {
    pub ssid: String,
    pub signal: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub signal: u8,
    pub security: String,
    pub connected: bool,
    /// A saved connection profile exists.
    pub known: bool,
}

impl WifiNetwork {
    pub fn is_secured(&self) -> bool {
        !self.security.is_empty() && self.security != "--"
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkStatus {
    pub radio: RadioStatus,
    pub active: Option<ActiveConnection>,
}

pub fn get_status(timeout: Duration) -> Result<NetworkStatus, PopupError> {
    let radio = Cmd::new("nmcli")
        .args(["-t", "radio", "all"])
        .timeout(timeout)
        .run()?;
    let radio = parse_radio(&radio.stdout)
        .ok_or_else(|| PopupError::parse("nmcli radio", radio.stdout.trim()))?;

    let active = if radio.wifi_enabled {
        active_connection(timeout)?
    } else {
        None
    };
    Ok(NetworkStatus { radio, active })
}

pub fn set_wifi(enabled: bool, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("nmcli")
        .args(["radio", "wifi", on_off(enabled)])
        .timeout(timeout)
        .run()?;
    info!("Wi-Fi radio {}", on_off(enabled));
    Ok(())
}

/// Airplane mode switches every radio off.
pub fn set_airplane_mode(enabled: bool, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("nmcli")
        .args(["radio", "all", on_off(!enabled)])
        .timeout(timeout)
        .run()?;
    info!("Airplane mode {}", on_off(enabled));
    Ok(())
}

/// Rescan, then list visible networks merged with saved profiles.
pub fn scan(token: &CancellationToken, timeout: Duration) -> Result<Vec<WifiNetwork>, PopupError> {
    // Rescans are rate limited by NetworkManager; a refusal is fine.
    if let Err(e) = Cmd::new("nmcli")
        .args(["device", "wifi", "rescan"])
        .timeout(timeout)
        .cancel_on(token)
        .run()
    {
        if matches!(e, PopupError::Cancelled(_)) {
            return Err(e);
        }
        debug!("Wi-Fi rescan refused: {}", e);
    }

    let list = Cmd::new("nmcli")
        .args(["-t", "-f", "SSID,SIGNAL,SECURITY,IN-USE", "device", "wifi", "list"])
        .timeout(timeout)
        .cancel_on(token)
        .run()?;
    token.check()?;
    let known = known_networks(timeout)?;

    Ok(parse_wifi_list(&list.stdout, &known))
}

pub fn connect(ssid: &str, token: &CancellationToken) -> Result<(), PopupError> {
    Cmd::new("nmcli")
        .args(["device", "wifi", "connect", ssid])
        .timeout(CONNECT_TIMEOUT)
        .cancel_on(token)
        .run()?;
    info!("Connected to {}", ssid);
    Ok(())
}

pub fn disconnect(ssid: &str, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("nmcli")
        .args(["connection", "down", "id", ssid])
        .timeout(timeout)
        .run()?;
    info!("Disconnected from {}", ssid);
    Ok(())
}

pub fn forget(ssid: &str, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("nmcli")
        .args(["connection", "delete", "id", ssid])
        .timeout(timeout)
        .run()?;
    info!("Forgot network {}", ssid);
    Ok(())
}

/// Open the first network settings tool that can be started.
pub fn open_settings() -> Result<(), PopupError> {
    const TOOLS: [(&str, &[&str]); 3] = [
        ("nm-connection-editor", &[]),
        ("gnome-control-center", &["network"]),
        ("systemsettings5", &["kcm_networkmanagement"]),
    ];

    let mut last_error = None;
    for (program, args) in TOOLS {
        match spawn_detached(program, args) {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!("{} unavailable: {}", program, e);
                last_error = Some(e);
            }
        }
    }
    warn!("No network settings tool found");
    Err(last_error.unwrap_or_else(|| PopupError::Other("no network settings tool".into())))
}

fn active_connection(timeout: Duration) -> Result<Option<ActiveConnection>, PopupError> {
    let active = Cmd::new("nmcli")
        .args(["-t", "-f", "NAME,DEVICE,TYPE", "connection", "show", "--active"])
        .timeout(timeout)
        .run()?;
    let Some(ssid) = parse_active_wifi(&active.stdout) else {
        return Ok(None);
    };

    let signal = Cmd::new("nmcli")
        .args(["-t", "-f", "IN-USE,SIGNAL", "device", "wifi", "list", "--rescan", "no"])
        .timeout(timeout)
        .run()
        .map(|out| parse_in_use_signal(&out.stdout))
        .unwrap_or(0);

    Ok(Some(ActiveConnection { ssid, signal }))
}

fn known_networks(timeout: Duration) -> Result<HashSet<String>, PopupError> {
    let output = Cmd::new("nmcli")
        .args(["-t", "-f", "NAME,TYPE", "connection", "show"])
        .timeout(timeout)
        .run()?;
    Ok(output
        .stdout
        .lines()
        .map(split_terse)
        .filter(|fields| fields.len() >= 2 && fields[1] == WIFI_TYPE)
        .map(|fields| fields[0].clone())
        .collect())
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// Split a terse line, honouring `\:` and `\\` escapes.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// `nmcli -t radio all`: `WIFI-HW:WIFI:WWAN-HW:WWAN`
fn parse_radio(output: &str) -> Option<RadioStatus> {
    let fields = split_terse(output.lines().next()?.trim());
    if fields.len() < 4 {
        return None;
    }
    let wifi_enabled = fields[1] == "enabled";
    let wwan_enabled = fields[3] == "enabled";
    Some(RadioStatus {
        wifi_enabled,
        airplane_mode: !wifi_enabled && !wwan_enabled,
    })
}

fn parse_active_wifi(output: &str) -> Option<String> {
    output
        .lines()
        .map(split_terse)
        .find(|fields| fields.len() >= 3 && fields[2] == WIFI_TYPE)
        .map(|fields| fields[0].clone())
}

fn parse_in_use_signal(output: &str) -> u8 {
    output
        .lines()
        .map(split_terse)
        .find(|fields| fields.len() >= 2 && fields[0] == "*")
        .and_then(|fields| fields[1].parse().ok())
        .unwrap_or(0)
}

/// Deduplicated by SSID, connected first, then by signal.
fn parse_wifi_list(output: &str, known: &HashSet<String>) -> Vec<WifiNetwork> {
    let mut seen = HashSet::new();
    let mut networks: Vec<WifiNetwork> = Vec::new();

    for fields in output.lines().map(split_terse) {
        if fields.len() < 4 {
            continue;
        }
        let ssid = fields[0].trim();
        let signal = fields[1].parse().unwrap_or(0);
        let connected = fields[3].contains('*');

        if ssid.is_empty() {
            continue;
        }
        if !seen.insert(ssid.to_string()) {
            // Same SSID on several access points: keep the best one.
            if let Some(existing) = networks.iter_mut().find(|n| n.ssid == ssid) {
                existing.signal = existing.signal.max(signal);
                existing.connected |= connected;
            }
            continue;
        }

        networks.push(WifiNetwork {
            ssid: ssid.to_string(),
            signal,
            security: fields[2].clone(),
            connected,
            known: known.contains(ssid),
        });
    }

    networks.sort_by(|a, b| b.connected.cmp(&a.connected).then(b.signal.cmp(&a.signal)));
    networks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_terse_escapes() {
        assert_eq!(split_terse(r"Cafe\:Guest:72:WPA2:"), vec!["Cafe:Guest", "72", "WPA2", ""]);
        assert_eq!(split_terse(r"back\\slash:1"), vec![r"back\slash", "1"]);
    }

    #[test]
    fn test_parse_radio() {
        let on = parse_radio("enabled:enabled:enabled:disabled\n").unwrap();
        assert!(on.wifi_enabled);
        assert!(!on.airplane_mode);

        let airplane = parse_radio("enabled:disabled:enabled:disabled\n").unwrap();
        assert!(!airplane.wifi_enabled);
        assert!(airplane.airplane_mode);

        assert!(parse_radio("garbage").is_none());
    }

    #[test]
    fn test_parse_active_wifi() {
        let out = "Wired connection 1:enp3s0:802-3-ethernet\nHomeNet:wlan0:802-11-wireless\n";
        assert_eq!(parse_active_wifi(out).as_deref(), Some("HomeNet"));
        assert_eq!(parse_active_wifi("lo:lo:loopback\n"), None);
    }

    #[test]
    fn test_parse_in_use_signal() {
        assert_eq!(parse_in_use_signal(" :40\n*:81\n :20\n"), 81);
        assert_eq!(parse_in_use_signal(" :40\n"), 0);
    }

    #[test]
    fn test_parse_wifi_list_dedups_and_sorts() {
        let out = "\
Neighbour:55:WPA2:
HomeNet:60:WPA2:*
Cafe\\:Guest:90::
Neighbour:75:WPA2:
:40:WPA2:
";
        let known: HashSet<String> = ["HomeNet".to_string()].into_iter().collect();
        let networks = parse_wifi_list(out, &known);

        let ssids: Vec<&str> = networks.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(ssids, vec!["HomeNet", "Cafe:Guest", "Neighbour"]);
        assert!(networks[0].connected && networks[0].known);
        assert!(!networks[1].is_secured());
        assert_eq!(networks[2].signal, 75);
    }
}
