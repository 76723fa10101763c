//! Nerd Font glyphs used by the popups.

use crate::services::battery::BatteryState;

pub const BRIGHTNESS: &str = "󰃟";
pub const MONITOR: &str = "󰍹";
pub const THEME: &str = "󰌵";
pub const VOLUME: &str = "";
pub const MUTE: &str = "";
pub const BATTERY_LIMIT: &str = "󱊣";
pub const CPU: &str = "󰻠";
pub const MEMORY: &str = "󰍛";
pub const DISK: &str = "󰋊";
pub const UPTIME: &str = "󰔟";
pub const BLUETOOTH: &str = "󰂯";
pub const WIFI: &str = "󰖩";
pub const AIRPLANE: &str = "󰀝";
pub const INFO: &str = "󰋼";
pub const DEMO: &str = "󰙨";

pub fn battery(state: BatteryState) -> &'static str {
    match state {
        BatteryState::Unknown => "󰂑",
        BatteryState::Alert => "󰂃",
        BatteryState::Bar0 => "󰁺",
        BatteryState::Bar1 => "󰁻",
        BatteryState::Bar2 => "󰁽",
        BatteryState::Bar3 => "󰁾",
        BatteryState::Bar4 => "󰂀",
        BatteryState::Bar5 => "󰂁",
        BatteryState::Bar6 | BatteryState::Full => "󰁹",
        BatteryState::Charging20 => "󰂆",
        BatteryState::Charging30 => "󰂈",
        BatteryState::Charging80 => "󰂊",
        BatteryState::Charging90 | BatteryState::ChargingFull => "󰂅",
    }
}

pub fn bluetooth_device(connected: bool, paired: bool) -> &'static str {
    if connected {
        "󰂯"
    } else if paired {
        "󰂲"
    } else {
        "󰂱"
    }
}

pub fn wifi_network(connected: bool, known: bool, secured: bool) -> &'static str {
    if connected {
        "󰤨"
    } else if known {
        "󰤥"
    } else if secured {
        "󰤡"
    } else {
        "󰤢"
    }
}

/// Bars for a 0-100 signal strength.
pub fn signal_bars(signal: u8) -> &'static str {
    match signal {
        80.. => "▂▄▆█",
        60..=79 => "▂▄▆",
        40..=59 => "▂▄",
        20..=39 => "▂",
        _ => "▁",
    }
}
