//! Subprocess helper for the wrapped OS utilities.
//!
//! Commands run on the calling (worker) thread inside a small current-thread
//! tokio runtime, so timeouts and cancellation can kill the child instead of
//! leaving it behind.

use crate::error::PopupError;
use capy_tasks::{CancellationToken, Cancelled};
use log::{debug, warn};
use std::process::Stdio;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandOutput {
    /// Exit code, -1 when killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Builder for a single command invocation.
#[derive(Clone, Debug)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    token: Option<CancellationToken>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kill the child once `token` is cancelled.
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.token = Some(token.clone());
        self
    }

    /// Run to completion and return the output whatever the exit status.
    pub fn output(self) -> Result<CommandOutput, PopupError> {
        self.execute(None)
    }

    /// Run to completion; a non-zero exit status is an error.
    pub fn run(self) -> Result<CommandOutput, PopupError> {
        let program = self.program.clone();
        let output = self.execute(None)?;
        check(&program, output)
    }

    /// Like [`Cmd::run`], but hands every stdout line to `on_line` as it arrives.
    pub fn stream(self, mut on_line: impl FnMut(&str)) -> Result<CommandOutput, PopupError> {
        let program = self.program.clone();
        let output = self.execute(Some(&mut on_line))?;
        check(&program, output)
    }

    fn execute(self, on_line: Option<&mut dyn FnMut(&str)>) -> Result<CommandOutput, PopupError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(self.execute_async(on_line))
    }

    async fn execute_async(
        &self,
        mut on_line: Option<&mut dyn FnMut(&str)>,
    ) -> Result<CommandOutput, PopupError> {
        debug!("Running {} {:?}", self.program, self.args);

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PopupError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async move {
            let mut collected = String::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(callback) = on_line.as_mut() {
                        callback(&line);
                    }
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        };

        let read_stderr = async move {
            let mut collected = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut collected).await;
            }
            collected
        };

        let finished = async {
            let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(CommandOutput {
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        };

        let token = self.token.clone();
        let cancelled = async move {
            match token {
                Some(token) => {
                    while !token.is_cancelled() {
                        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        // Returning early drops the child, which kills it.
        tokio::select! {
            result = tokio::time::timeout(self.timeout, finished) => match result {
                Ok(output) => Ok(output?),
                Err(_) => {
                    warn!("{} timed out after {:?}", self.program, self.timeout);
                    Err(PopupError::Timeout {
                        program: self.program.clone(),
                        timeout: self.timeout,
                    })
                }
            },
            _ = cancelled => {
                debug!("{} cancelled", self.program);
                Err(Cancelled.into())
            }
        }
    }
}

fn check(program: &str, output: CommandOutput) -> Result<CommandOutput, PopupError> {
    if output.success() {
        Ok(output)
    } else {
        Err(PopupError::CommandFailed {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Start a GUI helper and forget about it.
pub fn spawn_detached(program: &str, args: &[&str]) -> Result<(), PopupError> {
    let mut child = std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| PopupError::Spawn {
            program: program.to_string(),
            source,
        })?;

    // Reap it so it does not linger as a zombie.
    thread::Builder::new()
        .name(format!("reap_{}", program))
        .spawn(move || {
            let _ = child.wait();
        })?;
    Ok(())
}

/// Desktop notification. Failures are only logged.
pub fn notify(summary: &str, body: &str) {
    let result = Cmd::new("notify-send")
        .args([summary, body])
        .timeout(Duration::from_secs(5))
        .run();
    if let Err(e) = result {
        warn!("Failed to send notification: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = Cmd::new("capy-popups-definitely-missing-binary")
            .output()
            .unwrap_err();
        assert!(matches!(err, PopupError::Spawn { .. }));
    }

    #[test]
    fn test_failed_status_is_error() {
        let output = CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr: "No default controller available\n".into(),
        };
        match check("bluetoothctl", output) {
            Err(PopupError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, 1);
                assert_eq!(stderr, "No default controller available");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_success_passes_through() {
        let output = CommandOutput {
            status: 0,
            stdout: "ok\n".into(),
            stderr: String::new(),
        };
        assert_eq!(check("pactl", output.clone()).unwrap(), output);
    }

    #[test]
    fn test_builder_collects_args() {
        let cmd = Cmd::new("nmcli")
            .args(["-t", "-f"])
            .arg("SSID")
            .timeout(Duration::from_secs(3));
        assert_eq!(cmd.args, vec!["-t", "-f", "SSID"]);
        assert_eq!(cmd.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_real_exit_status() {
        assert!(Cmd::new("true").run().unwrap().success());
        match Cmd::new("false").run() {
            Err(PopupError::CommandFailed { program, status, .. }) => {
                assert_eq!(program, "false");
                assert_eq!(status, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Cmd::new("false").output().unwrap().status, 1);
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = Cmd::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(200))
            .run()
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            PopupError::Timeout { program, timeout } => {
                assert_eq!(program, "sleep");
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            PopupError::Timeout {
                program: "sleep".into(),
                timeout: Duration::from_millis(200),
            }
            .to_string(),
            "sleep timed out after 200ms"
        );
    }

    #[test]
    fn test_cancel_kills_child() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let started = Instant::now();
        let err = Cmd::new("sleep").arg("5").cancel_on(&token).run().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(err, PopupError::Cancelled(_)));
    }

    #[test]
    fn test_already_cancelled_token_stops_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let started = Instant::now();
        let err = Cmd::new("sleep").arg("5").cancel_on(&token).run().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(err, PopupError::Cancelled(_)));
    }

    #[test]
    fn test_stream_hands_out_lines_in_order() {
        let mut lines = Vec::new();
        let err = Cmd::new("sh")
            .args(["-c", "echo a; echo b >&2; echo c; exit 3"])
            .stream(|line| lines.push(line.to_string()))
            .unwrap_err();

        assert_eq!(lines, vec!["a", "c"]);
        match err {
            PopupError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_output_collects_both_streams() {
        let output = Cmd::new("sh")
            .args(["-c", "echo a; echo b >&2; echo c; exit 3"])
            .output()
            .unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout, "a\nc\n");
        assert_eq!(output.stderr, "b\n");
    }
}
