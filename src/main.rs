//! CapyPopups - popup daemon for the Capy desktop
//!
//! `CapyPopups [category]` toggles a popup. The first invocation becomes the
//! daemon; later ones forward their arguments to it over a Unix socket.

mod config;
mod daemon;
mod dispatcher;
mod error;
mod icons;
mod ipc;
mod panel_manager;
mod panels;
mod services;

mod functions {
    pub mod formatting;
}

use config::DaemonConfig;
use error::PopupError;
use log::{info, warn};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().collect();
    let config = DaemonConfig::load();

    // Forward to a running daemon, or become it.
    for _ in 0..2 {
        match ipc::forward(&config.socket_path, &argv, config.request_timeout()) {
            Ok(response) => {
                if let Some(message) = response.message {
                    eprintln!("{}", message);
                }
                std::process::exit(response.exit_code);
            }
            Err(PopupError::DaemonNotRunning) => {}
            Err(e) => {
                // exit code stays 0 whatever happens to the request
                warn!("Failed to reach the daemon: {}", e);
                return Ok(());
            }
        }

        info!("Starting CapyPopups daemon...");
        match daemon::run(config.clone(), &argv) {
            Ok(()) => return Ok(()),
            // another instance won the race for the socket, forward to it
            Err(PopupError::AlreadyRunning(path)) => {
                info!("Daemon already listening on {}", path.display());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
