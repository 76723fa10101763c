//! Display brightness and theme mode.
//!
//! - Laptop panel through `brightnessctl`
//! - External monitors through DDC/CI (`ddcutil`, VCP feature 0x10)
//! - Light/dark theme through the user's toggle script

use crate::error::PopupError;
use crate::services::command::Cmd;
use log::debug;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// ddcutil is slow (it talks I2C to the monitor).
const DDC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ThemeMode {
    Light,
    #[default]
    Dark,
}

impl ThemeMode {
    pub fn is_light(self) -> bool {
        self == ThemeMode::Light
    }
}

/// Brightness levels read when the popup opens. `None` when unavailable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrightnessStatus {
    pub laptop: Option<u8>,
    pub external: Option<u8>,
    pub theme: ThemeMode,
}

pub fn get_status(timeout: Duration, theme_cache: &Path) -> BrightnessStatus {
    let laptop = read_laptop(timeout)
        .inspect_err(|e| debug!("Laptop brightness unavailable: {}", e))
        .ok();
    let external = read_external()
        .inspect_err(|e| debug!("External brightness unavailable: {}", e))
        .ok();
    BrightnessStatus {
        laptop,
        external,
        theme: read_theme_mode(theme_cache),
    }
}

pub fn read_laptop(timeout: Duration) -> Result<u8, PopupError> {
    let output = Cmd::new("brightnessctl").arg("-m").timeout(timeout).run()?;
    parse_brightnessctl(&output.stdout)
        .ok_or_else(|| PopupError::parse("brightnessctl output", output.stdout.trim()))
}

pub fn set_laptop(percent: u8, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("brightnessctl")
        .args(["set", &format!("{}%", percent)])
        .timeout(timeout)
        .run()?;
    Ok(())
}

pub fn read_external() -> Result<u8, PopupError> {
    let output = Cmd::new("ddcutil")
        .args(["getvcp", "10", "--brief"])
        .timeout(DDC_TIMEOUT)
        .run()?;
    parse_ddcutil_brief(&output.stdout)
        .ok_or_else(|| PopupError::parse("ddcutil output", output.stdout.trim()))
}

pub fn set_external(percent: u8) -> Result<(), PopupError> {
    Cmd::new("ddcutil")
        .args(["setvcp", "10", &percent.to_string()])
        .timeout(DDC_TIMEOUT)
        .run()?;
    Ok(())
}

/// Current mode from the theme cache file, dark when unknown.
pub fn read_theme_mode(cache: &Path) -> ThemeMode {
    match fs::read_to_string(cache) {
        Ok(contents) if contents.trim().eq_ignore_ascii_case("light") => ThemeMode::Light,
        _ => ThemeMode::Dark,
    }
}

pub fn toggle_theme(script: &Path, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new(script.to_string_lossy())
        .arg("toggle")
        .timeout(timeout)
        .run()?;
    Ok(())
}

/// `brightnessctl -m`: `intel_backlight,backlight,19200,80%,24000`
fn parse_brightnessctl(output: &str) -> Option<u8> {
    let line = output.lines().next()?;
    let percent = line.split(',').nth(3)?.trim().trim_end_matches('%');
    percent.parse::<u8>().ok().map(|p| p.min(100))
}

/// `ddcutil getvcp 10 --brief`: `VCP 10 C 50 100`
fn parse_ddcutil_brief(output: &str) -> Option<u8> {
    let line = output.lines().find(|l| l.starts_with("VCP 10"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let current: u32 = fields.get(3)?.parse().ok()?;
    let max: u32 = fields.get(4)?.parse().ok()?;
    if max == 0 {
        return None;
    }
    Some(((current * 100 + max / 2) / max).min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brightnessctl() {
        assert_eq!(
            parse_brightnessctl("intel_backlight,backlight,19200,80%,24000\n"),
            Some(80)
        );
        assert_eq!(parse_brightnessctl("garbage"), None);
        assert_eq!(parse_brightnessctl(""), None);
    }

    #[test]
    fn test_parse_ddcutil_brief() {
        assert_eq!(parse_ddcutil_brief("VCP 10 C 50 100\n"), Some(50));
        // Monitors with a non-100 scale.
        assert_eq!(parse_ddcutil_brief("VCP 10 C 30 60\n"), Some(50));
        assert_eq!(parse_ddcutil_brief("VCP 10 ERR\n"), None);
        assert_eq!(parse_ddcutil_brief("VCP 10 C 0 0\n"), None);
    }

    #[test]
    fn test_theme_mode_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("matugen-mode");

        assert_eq!(read_theme_mode(&cache), ThemeMode::Dark);

        fs::write(&cache, "light\n").unwrap();
        assert!(read_theme_mode(&cache).is_light());

        fs::write(&cache, "dark").unwrap();
        assert_eq!(read_theme_mode(&cache), ThemeMode::Dark);
    }
}
