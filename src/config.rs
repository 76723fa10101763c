//! Daemon configuration.
//!
//! Read once at startup from `$XDG_CONFIG_HOME/CapyPopups/config.json`.
//! Every field has a default, so a partial (or missing) file is fine.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for the IPC socket location.
pub const SOCKET_ENV: &str = "CAPY_POPUPS_SOCKET";

const APP_DIR: &str = "CapyPopups";
const SOCKET_NAME: &str = "capy-popups.sock";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Dispatch failures are appended here.
    pub diagnostic_log: PathBuf,
    /// How long a forwarded request waits for the loop before replying anyway.
    pub request_timeout_ms: u64,
    /// Default timeout for wrapped OS commands.
    pub command_timeout_secs: u64,
    /// Minimum spacing of streamed progress events.
    pub progress_throttle_ms: u64,
    /// Bluetooth discovery duration.
    pub bluetooth_scan_secs: u64,
    pub battery_threshold_path: PathBuf,
    pub battery_limit_file: PathBuf,
    pub battery_limit_helper: PathBuf,
    pub theme_toggle_script: PathBuf,
    pub theme_mode_cache: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Self {
            socket_path: default_socket_path(),
            diagnostic_log: PathBuf::from("/tmp/capy_popups.log"),
            request_timeout_ms: 2000,
            command_timeout_secs: 10,
            progress_throttle_ms: 250,
            bluetooth_scan_secs: 10,
            battery_threshold_path: PathBuf::from(
                "/sys/class/power_supply/BAT0/charge_control_end_threshold",
            ),
            battery_limit_file: home.join(".config/battery-limit.conf"),
            battery_limit_helper: home.join(".local/bin/battery-limit"),
            theme_toggle_script: home.join(".config/hypr/scripts/toggle-theme.sh"),
            theme_mode_cache: home.join(".cache/matugen-mode"),
        }
    }
}

impl DaemonConfig {
    /// Load from the user config dir, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    /// Parse `path`, falling back to defaults when it is missing or malformed.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Malformed config {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(socket) = std::env::var_os(SOCKET_ENV).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms)
    }
}

/// `$XDG_CONFIG_HOME/CapyPopups/config.json`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("config.json"));
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "command_timeout_secs": 3, "diagnostic_log": "/tmp/x.log" }"#)
            .unwrap();

        let config = DaemonConfig::load_from(&path);
        assert_eq!(config.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.diagnostic_log, PathBuf::from("/tmp/x.log"));
        assert_eq!(config.request_timeout_ms, DaemonConfig::default().request_timeout_ms);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(DaemonConfig::load_from(&path), DaemonConfig::default());
    }

    #[test]
    fn test_socket_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();

        let mut config = DaemonConfig::default();
        unsafe {
            env::set_var(SOCKET_ENV, "/tmp/test-capy.sock");
        }
        config.apply_env();
        unsafe {
            env::remove_var(SOCKET_ENV);
        }

        assert_eq!(config.socket_path, PathBuf::from("/tmp/test-capy.sock"));
    }

    #[test]
    fn test_empty_socket_env_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();

        let mut config = DaemonConfig::default();
        let before = config.socket_path.clone();
        unsafe {
            env::set_var(SOCKET_ENV, "");
        }
        config.apply_env();
        unsafe {
            env::remove_var(SOCKET_ENV);
        }

        assert_eq!(config.socket_path, before);
    }
}
