//! Default sink volume through `pactl`.
//!
//! Works with both PulseAudio and PipeWire (pipewire-pulse).

use crate::error::PopupError;
use crate::services::command::Cmd;
use std::time::Duration;

const DEFAULT_SINK: &str = "@DEFAULT_SINK@";

/// Volume status of the default sink.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeStatus {
    /// Volume percentage (0-100+, can exceed 100 for amplified audio)
    pub volume_percent: i32,
    pub muted: bool,
}

impl Default for VolumeStatus {
    fn default() -> Self {
        Self {
            volume_percent: 50,
            muted: false,
        }
    }
}

pub fn get_status(timeout: Duration) -> Result<VolumeStatus, PopupError> {
    let volume = Cmd::new("pactl")
        .args(["get-sink-volume", DEFAULT_SINK])
        .timeout(timeout)
        .run()?;
    let mute = Cmd::new("pactl")
        .args(["get-sink-mute", DEFAULT_SINK])
        .timeout(timeout)
        .run()?;

    Ok(VolumeStatus {
        volume_percent: parse_volume(&volume.stdout)
            .ok_or_else(|| PopupError::parse("pactl volume", volume.stdout.trim()))?,
        muted: parse_mute(&mute.stdout),
    })
}

pub fn set_volume(percent: i32, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("pactl")
        .args(["set-sink-volume", DEFAULT_SINK, &format!("{}%", percent.max(0))])
        .timeout(timeout)
        .run()?;
    Ok(())
}

pub fn set_mute(muted: bool, timeout: Duration) -> Result<(), PopupError> {
    Cmd::new("pactl")
        .args(["set-sink-mute", DEFAULT_SINK, if muted { "1" } else { "0" }])
        .timeout(timeout)
        .run()?;
    Ok(())
}

/// Mute state to apply after a volume change: muting at zero, unmuting above it.
pub fn auto_mute(volume_percent: i32, muted: bool) -> Option<bool> {
    match volume_percent {
        0 if !muted => Some(true),
        v if v > 0 && muted => Some(false),
        _ => None,
    }
}

/// `Volume: front-left: 42598 /  65% / -11.23 dB,   front-right: ...`
fn parse_volume(output: &str) -> Option<i32> {
    output
        .lines()
        .filter(|line| line.contains("Volume:"))
        .flat_map(|line| line.split_whitespace())
        .find_map(|token| token.strip_suffix('%')?.parse().ok())
}

/// `Mute: yes`
fn parse_mute(output: &str) -> bool {
    output.to_lowercase().contains("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume() {
        let out = "Volume: front-left: 42598 /  65% / -11.23 dB,   front-right: 42598 /  65% / -11.23 dB\n        balance 0.00\n";
        assert_eq!(parse_volume(out), Some(65));
        assert_eq!(parse_volume("Volume: mono: 98304 / 150% / 10.57 dB"), Some(150));
        assert_eq!(parse_volume("Failed to get sink volume"), None);
    }

    #[test]
    fn test_parse_mute() {
        assert!(parse_mute("Mute: yes\n"));
        assert!(!parse_mute("Mute: no\n"));
    }

    #[test]
    fn test_auto_mute() {
        assert_eq!(auto_mute(0, false), Some(true));
        assert_eq!(auto_mute(0, true), None);
        assert_eq!(auto_mute(40, true), Some(false));
        assert_eq!(auto_mute(40, false), None);
    }
}
