// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The sharing session: one directory, one port, one funnel.
//!
//! A [`Session`] validates its inputs, discovers the public host name, clears
//! state left behind by an earlier run, starts the file server, exposes it
//! through the tunnel and then waits for a shutdown request. Whatever ends
//! the run (interrupt, error, early return or drop) goes through
//! [`Session::teardown`], which stops the server and resets the funnel at
//! most once per run.
//!
//! ```text
//! Idle -> Resetting -> Serving -> Exposed -> Terminating -> Idle
//! ```

use chrono::{DateTime, Local};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::{self, ColorConfig};
use crate::config::{Config, DEFAULT_PORT};
use crate::discovery::{self, DiscoverySettings, MachineIdentity};
use crate::error::ShareError;
use crate::server::{self, FileServer, Readiness, ServerProcess};
use crate::tunnel::Tunnel;

/// Where user-facing progress lines go.
pub type Output = Box<dyn Write + Send>;

/// How long a failed expose waits for a pending interrupt. A terminal
/// Ctrl+C reaches the tunnel command too, which then fails on its own.
const INTERRUPT_GRACE: Duration = Duration::from_millis(200);

/// Buffered transitions per subscriber; one run produces five.
const STATE_CHANNEL_CAPACITY: usize = 16;

/// What to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRequest {
    /// Directory to serve; the current directory when `None`.
    pub directory: Option<PathBuf>,
    /// Local port for the file server.
    pub port: u16,
}

impl Default for ShareRequest {
    fn default() -> Self {
        Self {
            directory: None,
            port: DEFAULT_PORT,
        }
    }
}

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing running.
    Idle,
    /// Clearing leftovers from an earlier run.
    Resetting,
    /// File server started, not yet public.
    Serving,
    /// Publicly reachable; waiting for shutdown.
    Exposed,
    /// Stopping the server and resetting the funnel.
    Terminating,
}

/// Timing knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on waiting for the server to accept connections.
    pub readiness_timeout: Duration,
    /// How often the exposed session wakes up.
    pub poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_timeout: Duration,
    /// Domain fallbacks for discovery.
    pub discovery: DiscoverySettings,
}

impl SessionSettings {
    /// Builds settings from a loaded config.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            readiness_timeout: Duration::from_millis(config.server.readiness_timeout_ms),
            poll_interval: Duration::from_millis(config.server.poll_interval_ms),
            terminate_timeout: Duration::from_secs(config.server.terminate_timeout_secs),
            discovery: DiscoverySettings::from_config(&config.tunnel),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What [`reset_stale`] managed to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleReset {
    /// A leftover file server was signalled.
    pub killed_server: bool,
    /// The funnel reset command succeeded.
    pub funnel_reset: bool,
}

/// Best-effort removal of a previous run's server and funnel.
///
/// Failures are logged and reported in the result, never returned.
pub async fn reset_stale<T: Tunnel + ?Sized>(
    tunnel: &T,
    server: &FileServer,
    port: u16,
) -> StaleReset {
    let killed_server = match server.kill_stale(port).await {
        Ok(killed) => {
            if killed {
                info!("Stopped a leftover file server on port {port}");
            }
            killed
        }
        Err(e) => {
            warn!("Could not check for leftover file servers: {e}");
            false
        }
    };

    let funnel_reset = match tunnel.reset().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not reset existing funnel: {e}");
            false
        }
    };

    StaleReset {
        killed_server,
        funnel_reset,
    }
}

/// Resolves the directory to share to an absolute, existing directory.
///
/// # Errors
///
/// Returns [`ShareError::Validation`] if the path does not exist, is not a
/// directory, or the current directory cannot be determined.
pub fn resolve_directory(directory: Option<&Path>) -> Result<PathBuf, ShareError> {
    let path = match directory {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().map_err(|e| {
            ShareError::Validation(format!("Cannot determine the current directory: {e}"))
        })?,
    };

    match path.canonicalize() {
        Ok(canonical) if canonical.is_dir() => Ok(canonical),
        Ok(canonical) => Err(ShareError::not_a_directory(&canonical)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ShareError::missing_directory(&path))
        }
        Err(e) => Err(ShareError::Validation(format!(
            "Cannot access '{}': {e}",
            path.display()
        ))),
    }
}

/// One sharing session.
pub struct Session<T: Tunnel> {
    tunnel: T,
    server: FileServer,
    settings: SessionSettings,
    colors: ColorConfig,
    out: Output,

    directory: Option<PathBuf>,
    port: u16,
    identity: Option<MachineIdentity>,

    /// Present iff a server was spawned and not yet reaped.
    process: Option<ServerProcess>,
    exposed_at: Option<DateTime<Local>>,

    cleanup_registered: bool,
    /// Set while there is something to tear down; cleared by the first
    /// teardown. Every teardown path holds `&mut self`, so a plain flag is
    /// enough to make it run once.
    armed: bool,
    state: SessionState,
    transitions: broadcast::Sender<SessionState>,
}

impl<T: Tunnel> Session<T> {
    /// Creates an idle session writing progress to stdout.
    #[must_use]
    pub fn new(tunnel: T, server: FileServer, settings: SessionSettings) -> Self {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            tunnel,
            server,
            settings,
            colors: ColorConfig::disabled(),
            out: Box::new(std::io::stdout()),
            directory: None,
            port: DEFAULT_PORT,
            identity: None,
            process: None,
            exposed_at: None,
            cleanup_registered: false,
            armed: false,
            state: SessionState::Idle,
            transitions,
        }
    }

    /// Sends progress lines and the banner to `out` instead of stdout.
    #[must_use]
    pub fn with_output(mut self, out: Output) -> Self {
        self.out = out;
        self
    }

    /// Highlights the URL according to `colors`.
    #[must_use]
    pub fn with_colors(mut self, colors: ColorConfig) -> Self {
        self.colors = colors;
        self
    }

    /// The tunnel this session drives.
    pub const fn tunnel(&self) -> &T {
        &self.tunnel
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Receives every lifecycle transition made after subscribing, in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    /// Directory of the current or last run.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Port of the current or last run.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Identity discovered for the current or last run.
    #[must_use]
    pub const fn identity(&self) -> Option<&MachineIdentity> {
        self.identity.as_ref()
    }

    /// Pid of the running file server, if any.
    #[must_use]
    pub fn server_pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::id)
    }

    /// Whether teardown has been wired up for this session.
    #[must_use]
    pub const fn is_cleanup_registered(&self) -> bool {
        self.cleanup_registered
    }

    /// Shares a directory until `shutdown` resolves.
    ///
    /// Returns `Ok(())` when the run ended because of `shutdown`, including
    /// an interrupt that arrives while the funnel is being configured.
    /// Teardown has always run by the time this returns, unless validation
    /// or discovery failed, in which case nothing was started.
    ///
    /// # Errors
    ///
    /// - [`ShareError::Validation`] for a bad directory or port.
    /// - [`ShareError::Discovery`] if the tunneling tool's status is
    ///   unavailable.
    /// - [`ShareError::TunnelConfig`] if exposing the port fails.
    /// - [`ShareError::Runtime`] if the server cannot start or dies.
    pub async fn share<F>(&mut self, request: ShareRequest, shutdown: F) -> Result<(), ShareError>
    where
        F: Future<Output = ()>,
    {
        let directory = resolve_directory(request.directory.as_deref())?;
        if request.port == 0 {
            return Err(ShareError::Validation(
                "Port must be between 1 and 65535".to_string(),
            ));
        }
        let port = request.port;

        let identity = discovery::discover(&self.tunnel, &self.settings.discovery).await?;
        let url = identity.public_url()?;

        self.directory = Some(directory.clone());
        self.port = port;
        self.identity = Some(identity);

        self.register_cleanup();
        let shutdown = std::pin::pin!(shutdown);
        let result = self.run(&directory, port, &url, shutdown).await;
        if let Err(e) = &result {
            debug!("Session failed: {e}");
        }
        self.teardown().await;
        result
    }

    fn register_cleanup(&mut self) {
        if !self.cleanup_registered {
            self.cleanup_registered = true;
            debug!("Cleanup registered");
        }
        self.armed = true;
    }

    async fn run<F>(
        &mut self,
        directory: &Path,
        port: u16,
        url: &Url,
        mut shutdown: Pin<&mut F>,
    ) -> Result<(), ShareError>
    where
        F: Future<Output = ()>,
    {
        self.transition(SessionState::Resetting);
        self.say("Cleaning up any previous instances...");
        reset_stale(&self.tunnel, &self.server, port).await;

        self.transition(SessionState::Serving);
        self.say(&format!("Starting file server on port {port}..."));
        self.say(&format!("Serving files from: {}", directory.display()));

        server::wait_for_free_port(port, self.settings.readiness_timeout).await?;
        let process = self.process.insert(self.server.spawn(directory, port)?);

        let readiness = tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
            readiness = server::wait_until_ready(process, self.settings.readiness_timeout) => readiness?,
        };
        if readiness == Readiness::TimedOut {
            warn!(
                "File server did not accept connections within {}ms, continuing anyway",
                self.settings.readiness_timeout.as_millis()
            );
        }

        if self.tunnel.requires_privilege() {
            self.say("Configuring Tailscale Funnel (requires sudo)...");
        } else {
            self.say("Configuring Tailscale Funnel...");
        }
        let exposed = tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("Shutdown requested while configuring the funnel");
                return Ok(());
            }
            exposed = self.tunnel.expose(port) => exposed,
        };
        if let Err(source) = exposed {
            if tokio::time::timeout(INTERRUPT_GRACE, &mut shutdown)
                .await
                .is_ok()
            {
                info!("Funnel command ended by shutdown: {source}");
                return Ok(());
            }
            return Err(ShareError::TunnelConfig { port, source });
        }

        self.transition(SessionState::Exposed);
        self.exposed_at = Some(Local::now());
        self.print_banner(url);

        self.wait(shutdown).await
    }

    /// Idles until shutdown, checking on the server every poll interval.
    async fn wait<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<(), ShareError>
    where
        F: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                () = tokio::time::sleep(self.settings.poll_interval) => {
                    if let Some(process) = self.process.as_mut()
                        && let Some(status) = process.exit_status()
                    {
                        return Err(ShareError::Runtime(format!(
                            "File server exited unexpectedly ({status})"
                        )));
                    }
                }
            }
        }
    }

    /// Stops the server and resets the funnel.
    ///
    /// Runs at most once per [`Session::share`] call; later calls, and calls
    /// before anything was started, do nothing and return `false`. Every
    /// failure is logged and swallowed.
    pub async fn teardown(&mut self) -> bool {
        if !self.begin_teardown() {
            return false;
        }

        if let Some(process) = self.process.take() {
            process.terminate(self.settings.terminate_timeout).await;
        }
        let reset = self.tunnel.reset().await.map_err(|e| e.to_string());

        self.finish_teardown(reset);
        true
    }

    /// Disarms the session. Returns whether there was anything to tear down.
    fn begin_teardown(&mut self) -> bool {
        if !std::mem::take(&mut self.armed) {
            return false;
        }
        self.transition(SessionState::Terminating);
        self.say("\nCleaning up...");
        true
    }

    fn finish_teardown(&mut self, reset: Result<(), String>) {
        match reset {
            Ok(()) => self.say("Funnel and file server stopped."),
            Err(e) => {
                warn!("Failed to reset Tailscale Funnel: {e}");
                let line = self.colors.yellow("Warning: Failed to reset Tailscale Funnel.");
                self.say(&line);
                self.say("File server stopped.");
            }
        }

        if let Some(exposed_at) = self.exposed_at.take() {
            info!(
                "Shared {} for {}",
                self.directory
                    .as_deref()
                    .map_or_else(String::new, |d| d.display().to_string()),
                cli::format_elapsed(Local::now() - exposed_at)
            );
        }

        self.transition(SessionState::Idle);
    }

    /// Resets the funnel without an enclosing runtime to await on.
    ///
    /// Runs the reset on a private single-threaded runtime in a scoped
    /// thread, which also works while a runtime is driving the caller.
    fn reset_blocking(&self) -> Result<(), String> {
        let tunnel = &self.tunnel;
        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| format!("cannot start runtime: {e}"))?;
                    runtime.block_on(tunnel.reset()).map_err(|e| e.to_string())
                })
                .join()
                .unwrap_or_else(|_| Err("reset thread panicked".to_string()))
        })
    }

    fn print_banner(&mut self, url: &Url) {
        let rule = "===================================================";
        let url = self.colors.green(url.as_str());
        let hint = self.colors.dim("Press Ctrl+C to stop the server and clean up");
        self.say("");
        self.say(rule);
        self.say("Directory is now available via Tailscale Funnel at:");
        self.say(&url);
        self.say("");
        self.say(&hint);
        self.say(rule);
    }

    fn say(&mut self, line: &str) {
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }

    fn transition(&mut self, next: SessionState) {
        let previous = std::mem::replace(&mut self.state, next);
        debug!("Session state: {previous:?} -> {next:?}");
        // No subscribers is fine
        let _ = self.transitions.send(next);
    }
}

impl<T: Tunnel> Drop for Session<T> {
    /// Covers a `share` future that was dropped before its teardown ran.
    fn drop(&mut self) {
        if !self.begin_teardown() {
            return;
        }
        warn!("Session dropped while running, cleaning up");

        // The server is killed when its handle drops
        drop(self.process.take());
        let reset = self.reset_blocking();

        self.finish_teardown(reset);
    }
}
