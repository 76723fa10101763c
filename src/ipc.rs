//! Single-instance IPC over a Unix socket.
//!
//! The first invocation binds the socket and becomes the daemon; later ones
//! forward their argv and exit. One JSON line each way:
//!
//! - request: `{"argv": ["CapyPopups", "volume"]}`
//! - reply: `{"exit_code": 0, "message": null}`

use crate::error::PopupError;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Extra time a client waits on top of the daemon's own reply timeout.
const CLIENT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub argv: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub exit_code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

/// A forwarded invocation waiting for the loop to dispatch it.
pub struct PendingRequest {
    pub argv: Vec<String>,
    reply: Sender<Response>,
}

impl PendingRequest {
    pub fn new(argv: Vec<String>) -> (Self, Receiver<Response>) {
        let (reply, rx) = bounded(1);
        (Self { argv, reply }, rx)
    }

    pub fn respond(self, response: Response) {
        if self.reply.send(response).is_err() {
            debug!("Client went away before the reply for {:?}", self.argv);
        }
    }
}

/// Bind the daemon socket, clearing a stale one left by a dead daemon.
pub fn bind(path: &Path) -> Result<UnixListener, PopupError> {
    if path.exists() {
        match UnixStream::connect(path) {
            Ok(_) => return Err(PopupError::AlreadyRunning(path.to_path_buf())),
            Err(e) => {
                info!("Removing stale socket {} ({})", path.display(), e);
                fs::remove_file(path)?;
            }
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            return Err(PopupError::AlreadyRunning(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    info!("Listening on {}", path.display());
    Ok(listener)
}

/// Accept connections on a background thread, one handler thread each.
///
/// Handlers hand requests to the loop through `requests` and wait at most
/// `timeout` for the reply; past that the client gets a plain success.
pub fn start_listener(
    listener: UnixListener,
    requests: Sender<PendingRequest>,
    timeout: Duration,
) -> Result<JoinHandle<()>, PopupError> {
    let handle = thread::Builder::new()
        .name("ipc_accept".into())
        .spawn(move || {
            for (n, stream) in listener.incoming().enumerate() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("IPC accept failed: {}", e);
                        continue;
                    }
                };
                let requests = requests.clone();
                let spawned = thread::Builder::new()
                    .name(format!("ipc_client_{}", n))
                    .spawn(move || {
                        if let Err(e) = handle_connection(stream, &requests, timeout) {
                            warn!("IPC client error: {}", e);
                        }
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn IPC handler: {}", e);
                }
            }
        })?;
    Ok(handle)
}

fn handle_connection(
    stream: UnixStream,
    requests: &Sender<PendingRequest>,
    timeout: Duration,
) -> Result<(), PopupError> {
    stream.set_read_timeout(Some(timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        debug!("IPC client closed without a request");
        return Ok(());
    }
    let request: Request = serde_json::from_str(line.trim())?;
    debug!("IPC request {:?}", request.argv);

    let (pending, reply) = PendingRequest::new(request.argv);
    let response = if requests.send(pending).is_err() {
        warn!("Event loop is gone, answering request anyway");
        Response::default()
    } else {
        reply.recv_timeout(timeout).unwrap_or_else(|_| {
            warn!("No reply from the event loop within {:?}", timeout);
            Response::default()
        })
    };

    write_line(&stream, &response)
}

/// Send `argv` to a running daemon and wait for its reply.
pub fn forward(path: &Path, argv: &[String], timeout: Duration) -> Result<Response, PopupError> {
    let stream = match UnixStream::connect(path) {
        Ok(stream) => stream,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Err(PopupError::DaemonNotRunning);
        }
        Err(e) => return Err(e.into()),
    };
    stream.set_read_timeout(Some(timeout + CLIENT_GRACE))?;

    write_line(
        &stream,
        &Request {
            argv: argv.to_vec(),
        },
    )?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    Ok(serde_json::from_str(line.trim())?)
}

/// Remove the socket file; a missing file is fine.
pub fn remove_socket(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed socket {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove socket {}: {}", path.display(), e),
    }
}

fn write_line<T: Serialize>(mut stream: &UnixStream, value: &T) -> Result<(), PopupError> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    stream.write_all(json.as_bytes())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("popups.sock");
        fs::write(&path, b"left over").unwrap();

        let _listener = bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_second_bind_reports_running_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("popups.sock");
        let _listener = bind(&path).unwrap();

        assert!(matches!(bind(&path), Err(PopupError::AlreadyRunning(_))));
    }

    #[test]
    fn test_forward_without_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        assert!(matches!(
            forward(&path, &argv(&["CapyPopups", "volume"]), TIMEOUT),
            Err(PopupError::DaemonNotRunning)
        ));
    }

    #[test]
    fn test_forward_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("popups.sock");
        let listener = bind(&path).unwrap();
        let (tx, rx) = unbounded();
        start_listener(listener, tx, TIMEOUT).unwrap();

        let loop_thread = thread::spawn(move || {
            let pending: PendingRequest = rx.recv().unwrap();
            let argv = pending.argv.clone();
            pending.respond(Response {
                exit_code: 0,
                message: Some("Unknown popup 'nope'".into()),
            });
            argv
        });

        let response = forward(&path, &argv(&["CapyPopups", "nope"]), TIMEOUT).unwrap();
        assert_eq!(response.exit_code, 0);
        assert_eq!(response.message.as_deref(), Some("Unknown popup 'nope'"));
        assert_eq!(loop_thread.join().unwrap(), argv(&["CapyPopups", "nope"]));
    }

    #[test]
    fn test_unanswered_request_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("popups.sock");
        let listener = bind(&path).unwrap();
        let (tx, _rx) = unbounded();
        start_listener(listener, tx, Duration::from_millis(100)).unwrap();

        let response = forward(&path, &argv(&["CapyPopups", "volume"]), TIMEOUT).unwrap();
        assert_eq!(response, Response::default());
    }

    #[test]
    fn test_remove_socket_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("popups.sock");
        remove_socket(&path);
        fs::write(&path, b"").unwrap();
        remove_socket(&path);
        assert!(!path.exists());
    }
}
