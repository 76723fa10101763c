//! Battery status and charge limit.
//!
//! Status comes from the `battery` crate; the charge limit is read from sysfs
//! and applied through the user's `battery-limit` helper.

use crate::error::PopupError;
use crate::services::command::Cmd;
use battery::{Battery, Manager, State};
use log::{debug, error, info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const LIMIT_MIN: u8 = 50;
pub const LIMIT_MAX: u8 = 100;
pub const LIMIT_STEP: u8 = 5;
pub const DEFAULT_LIMIT: u8 = 80;

/// Coarse battery level, used to pick an icon.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum BatteryState {
    #[default]
    Unknown,
    Full,
    // Discharging states
    Alert,
    Bar0,
    Bar1,
    Bar2,
    Bar3,
    Bar4,
    Bar5,
    Bar6,
    // Charging states
    Charging20,
    Charging30,
    Charging80,
    Charging90,
    ChargingFull,
}

impl BatteryState {
    pub fn is_charging(self) -> bool {
        matches!(
            self,
            BatteryState::Charging20
                | BatteryState::Charging30
                | BatteryState::Charging80
                | BatteryState::Charging90
                | BatteryState::ChargingFull
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatteryStatus {
    pub percentage: i32,
    pub state: BatteryState,
    pub time_remaining: String,
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            percentage: 0,
            state: BatteryState::Unknown,
            time_remaining: String::new(),
        }
    }
}

/// Current status of the first battery, `None` on machines without one.
pub fn get_status() -> Option<BatteryStatus> {
    let manager = match Manager::new() {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to create battery manager: {}", e);
            return None;
        }
    };

    let mut battery = match manager.batteries() {
        Ok(mut batteries) => match batteries.next() {
            Some(Ok(battery)) => battery,
            Some(Err(e)) => {
                error!("Error reading battery: {}", e);
                return None;
            }
            None => {
                debug!("No battery found");
                return None;
            }
        },
        Err(e) => {
            error!("Failed to get batteries: {}", e);
            return None;
        }
    };

    if let Err(e) = manager.refresh(&mut battery) {
        error!("Failed to refresh battery: {}", e);
        return None;
    }

    let percentage = get_percentage(&battery);
    Some(BatteryStatus {
        percentage,
        state: determine_battery_state(battery.state(), percentage, battery.energy_rate().value),
        time_remaining: format_time_remaining(&battery),
    })
}

/// Charge limit currently enforced by the firmware.
pub fn read_threshold(path: &Path) -> u8 {
    match fs::read_to_string(path) {
        Ok(contents) => parse_threshold(&contents).unwrap_or_else(|| {
            warn!("Unexpected charge threshold {:?}, assuming {}%", contents.trim(), DEFAULT_LIMIT);
            DEFAULT_LIMIT
        }),
        Err(e) => {
            debug!("Charge threshold unavailable ({}): {}", path.display(), e);
            DEFAULT_LIMIT
        }
    }
}

/// Clamp to the supported range and round to the slider step.
pub fn snap_limit(value: i32) -> u8 {
    let clamped = value.clamp(LIMIT_MIN as i32, LIMIT_MAX as i32);
    let step = LIMIT_STEP as i32;
    (((clamped + step / 2) / step) * step).min(LIMIT_MAX as i32) as u8
}

/// Apply a new limit, persist it and nudge waybar to redraw.
pub fn apply_limit(
    helper: &Path,
    limit_file: &Path,
    limit: u8,
    timeout: Duration,
) -> Result<(), PopupError> {
    Cmd::new(helper.to_string_lossy())
        .args(["set", &limit.to_string()])
        .timeout(timeout)
        .run()?;

    if let Some(parent) = limit_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(limit_file, limit.to_string())?;
    info!("Battery charging limit set to {}%", limit);

    // waybar listens on SIGRTMIN+11 for the battery module
    if let Err(e) = Cmd::new("pkill")
        .args(["-SIGRTMIN+11", "waybar"])
        .timeout(timeout)
        .output()
    {
        debug!("Could not signal waybar: {}", e);
    }
    Ok(())
}

fn parse_threshold(contents: &str) -> Option<u8> {
    contents
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| (1..=100).contains(v))
}

#[inline]
fn get_percentage(battery: &Battery) -> i32 {
    (battery.state_of_charge().value * 100.0) as i32
}

fn determine_battery_state(state: State, percentage: i32, energy_rate: f32) -> BatteryState {
    match state {
        State::Charging => charging_state_from_percentage(percentage),
        State::Full => BatteryState::Full,
        State::Discharging => discharging_state_from_percentage(percentage),
        State::Empty => BatteryState::Alert,
        State::Unknown => {
            if energy_rate > 0.0 {
                charging_state_from_percentage(percentage)
            } else if percentage >= 95 {
                BatteryState::Full
            } else {
                discharging_state_from_percentage(percentage)
            }
        }
        _ => BatteryState::Unknown,
    }
}

fn discharging_state_from_percentage(percentage: i32) -> BatteryState {
    match percentage {
        0..=4 => BatteryState::Alert,
        5..=14 => BatteryState::Bar0,
        15..=29 => BatteryState::Bar1,
        30..=44 => BatteryState::Bar2,
        45..=59 => BatteryState::Bar3,
        60..=74 => BatteryState::Bar4,
        75..=89 => BatteryState::Bar5,
        90..=99 => BatteryState::Bar6,
        _ => BatteryState::Full,
    }
}

fn charging_state_from_percentage(percentage: i32) -> BatteryState {
    match percentage {
        0..=25 => BatteryState::Charging20,
        26..=50 => BatteryState::Charging30,
        51..=75 => BatteryState::Charging80,
        76..=99 => BatteryState::Charging90,
        _ => BatteryState::ChargingFull,
    }
}

fn format_time_remaining(battery: &Battery) -> String {
    let state = battery.state();
    let duration = match state {
        State::Charging => battery.time_to_full(),
        State::Discharging => battery.time_to_empty(),
        _ => None,
    };

    duration
        .map(|time| format_minutes((time.value / 60.0) as i32, state == State::Charging))
        .unwrap_or_default()
}

fn format_minutes(total_minutes: i32, charging: bool) -> String {
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    let suffix = if charging { "until charged" } else { "remaining" };
    format!("{}:{:02} {}", hours, minutes, suffix)
}
