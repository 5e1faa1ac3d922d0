// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Launching and supervising the file-serving subprocess.
//!
//! The server itself is an off-the-shelf program (`python3 -m http.server`
//! by default) invoked as `<command> <args...> <port>` with the shared
//! directory as its working directory. Its output is drained by background
//! tasks so a chatty server never blocks on a full pipe; the last few lines
//! are kept for error messages.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ShareError;

/// Lines of server output retained for error reporting.
const OUTPUT_TAIL_LINES: usize = 20;

/// Delay between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

type OutputTail = Arc<Mutex<VecDeque<String>>>;

/// How to start the file server.
#[derive(Debug, Clone)]
pub struct FileServer {
    command: String,
    args: Vec<String>,
}

/// Outcome of waiting for the server to accept connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A local connection succeeded.
    Ready,
    /// The server is still running but never accepted a connection in time.
    TimedOut,
}

impl FileServer {
    /// Creates a launcher for `command args... <port>`.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Builds a launcher from the `[server]` config section.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    /// The full command line for `port`, as it appears in a process listing.
    #[must_use]
    pub fn command_line(&self, port: u16) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        parts.push(self.command.clone());
        parts.extend(self.args.iter().cloned());
        parts.push(port.to_string());
        parts.join(" ")
    }

    /// `pkill -f` pattern matching this server on exactly `port`.
    ///
    /// Anchored at the end so port 80 does not match a server on 8000.
    #[must_use]
    pub fn stale_pattern(&self, port: u16) -> String {
        format!("{}$", regex::escape(&self.command_line(port)))
    }

    /// Kills leftover servers for `port` from an earlier, possibly crashed run.
    ///
    /// Matches on the full command line with `pkill -f`. Returns whether
    /// anything was signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if `pkill` cannot be run or reports a failure other
    /// than "no process matched".
    pub async fn kill_stale(&self, port: u16) -> std::io::Result<bool> {
        let pattern = self.stale_pattern(port);
        debug!("Running pkill -f {pattern}");

        let status = Command::new("pkill")
            .args(["-f", &pattern])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(std::io::Error::other(format!("pkill failed ({status})"))),
        }
    }

    /// Starts the server in `directory`, listening on `port`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ShareError::Runtime`] if the process cannot be spawned.
    pub fn spawn(&self, directory: &Path, port: u16) -> Result<ServerProcess, ShareError> {
        let mut command = std::process::Command::new(&self.command);
        command
            .args(&self.args)
            .arg(port.to_string())
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl+C reaches only us, and we decide
        // when the server stops.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut command = Command::from(command);
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ShareError::Runtime(format!(
                "Failed to start file server '{}': {e}",
                self.command
            ))
        })?;
        let pid = child.id().ok_or_else(|| {
            ShareError::Runtime(format!("File server '{}' exited at once", self.command))
        })?;

        let tail: OutputTail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain(stdout, "stdout", tail.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(stderr, "stderr", tail.clone()));
        }

        info!(
            "Started file server (pid {pid}): {}",
            self.command_line(port)
        );

        Ok(ServerProcess {
            child,
            pid,
            port,
            tail,
        })
    }
}

/// Forwards one output stream to the log, keeping the last lines.
async fn drain<R: AsyncRead + Unpin>(stream: R, name: &'static str, tail: OutputTail) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("file server {name}: {line}");
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

/// A running file server.
///
/// Dropping a still-running `ServerProcess` kills it.
pub struct ServerProcess {
    child: Child,
    pid: u32,
    port: u16,
    tail: OutputTail,
}

impl ServerProcess {
    /// OS process id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.pid
    }

    /// Port the server was started on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Exit status if the process has exited, reaping it.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// The most recent output lines, joined.
    #[must_use]
    pub fn recent_output(&self) -> String {
        self.tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Stops the server: SIGTERM, up to `timeout` to exit, then SIGKILL.
    ///
    /// Every failure along the way is logged and swallowed.
    pub async fn terminate(mut self, timeout: Duration) {
        if let Some(status) = self.exit_status() {
            debug!("File server already exited ({status})");
            return;
        }

        if request_exit(self.pid) {
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("File server exited ({status})");
                    return;
                }
                Ok(Err(e)) => debug!("Failed to wait for file server: {e}"),
                Err(_) => warn!(
                    "File server did not exit within {}s, killing it",
                    timeout.as_secs()
                ),
            }
        }

        if let Err(e) = self.child.kill().await {
            debug!("Failed to kill file server: {e}");
        }
    }
}

/// Sends SIGTERM. Returns whether a graceful exit was requested.
#[cfg(unix)]
fn request_exit(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to send SIGTERM to file server: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
const fn request_exit(_pid: u32) -> bool {
    false
}

/// Waits until nothing is bound to `port`, for up to `timeout`.
///
/// A server killed by the stale cleanup may still hold the port for a
/// moment.
///
/// # Errors
///
/// Returns [`ShareError::Runtime`] if the port is still taken afterwards.
pub async fn wait_for_free_port(port: u16, timeout: Duration) -> Result<(), ShareError> {
    let started = Instant::now();
    loop {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(_) => return Ok(()),
            Err(e) if started.elapsed() >= timeout => {
                return Err(ShareError::Runtime(format!(
                    "Port {port} is already in use ({e})"
                )));
            }
            Err(_) => tokio::time::sleep(PROBE_INTERVAL).await,
        }
    }
}

/// Probes `127.0.0.1:<port>` until the server accepts a connection.
///
/// # Errors
///
/// Returns [`ShareError::Runtime`] if the server exits while being probed,
/// which is how a failed bind shows up.
pub async fn wait_until_ready(
    process: &mut ServerProcess,
    timeout: Duration,
) -> Result<Readiness, ShareError> {
    let port = process.port();
    let started = Instant::now();
    loop {
        if let Some(status) = process.exit_status() {
            let output = process.recent_output();
            let detail = if output.is_empty() {
                String::new()
            } else {
                format!(":\n{output}")
            };
            return Err(ShareError::Runtime(format!(
                "File server exited before accepting connections on port {port} ({status}){detail}"
            )));
        }

        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            debug!("File server accepting connections on port {port}");
            return Ok(Readiness::Ready);
        }

        if started.elapsed() >= timeout {
            return Ok(Readiness::TimedOut);
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}
