//! System services used by the popups.
//!
//! Every function here blocks; popups only call them from background tasks.
//!
//! - `command` - subprocess helper with timeout, streaming and cancellation
//! - `brightness` - brightnessctl / ddcutil / theme toggle
//! - `volume` - PulseAudio/PipeWire volume via pactl
//! - `battery` - battery status and charge limit
//! - `bluetooth` - bluetoothctl
//! - `network` - NetworkManager via nmcli
//! - `system_info` - CPU, memory, disk, uptime via sysinfo

pub mod battery;
pub mod bluetooth;
pub mod brightness;
pub mod command;
pub mod network;
pub mod system_info;
pub mod volume;
