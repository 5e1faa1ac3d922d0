// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The tunneling tool, seen as a black box.
//!
//! [`Tunnel`] is the seam the session coordinator and discovery talk to;
//! [`TailscaleCli`] drives the real `tailscale` binary. Commands are run
//! directly, never through a shell.

use std::future::Future;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

use crate::config::TunnelConfig;
use crate::error::TunnelError;

/// Operations the coordinator needs from a tunneling provider.
///
/// Implementations must be `Sync`: a session dropped before its teardown
/// ran resets the funnel from a helper thread.
pub trait Tunnel: Sync {
    /// Single-line status for this machine (`status --self`).
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be run or reports failure.
    fn self_status(&self) -> impl Future<Output = Result<String, TunnelError>> + Send;

    /// Full machine-readable status (`status --json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be run or reports failure.
    fn status(&self) -> impl Future<Output = Result<String, TunnelError>> + Send;

    /// Expose `port` publicly.
    ///
    /// Dropping the returned future abandons the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be run or reports failure.
    fn expose(&self, port: u16) -> impl Future<Output = Result<(), TunnelError>> + Send;

    /// Revoke any public exposure. Safe to call when nothing is exposed.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be run or reports failure.
    fn reset(&self) -> impl Future<Output = Result<(), TunnelError>> + Send;

    /// Whether exposing a port may prompt for elevated privileges.
    fn requires_privilege(&self) -> bool {
        false
    }
}

/// [`Tunnel`] backed by the `tailscale` command line.
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    command: String,
    elevate: Option<String>,
    background: bool,
}

impl TailscaleCli {
    /// Builds a driver from the `[tunnel]` config section.
    #[must_use]
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            command: config.command.clone(),
            elevate: config
                .elevate
                .then(|| config.elevate_command.clone()),
            background: config.background,
        }
    }

    /// Whether `funnel` subcommands go through a privilege wrapper.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        self.elevate.is_some()
    }

    /// Runs a read-only query and returns its stdout.
    async fn query(&self, args: &[&str]) -> Result<String, TunnelError> {
        let rendered = render(&self.command, args);
        debug!("Running {rendered}");

        let output = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TunnelError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        check_output(rendered, output)
    }

    /// Runs a `funnel` subcommand, elevated if configured.
    ///
    /// Stdio is inherited so the privilege wrapper can prompt for a password.
    async fn funnel(&self, args: &[&str]) -> Result<(), TunnelError> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
        let program = match &self.elevate {
            Some(wrapper) => {
                full.push(&self.command);
                wrapper.as_str()
            }
            None => self.command.as_str(),
        };
        full.push("funnel");
        full.extend_from_slice(args);

        let rendered = render(program, &full);
        debug!("Running {rendered}");

        let status = Command::new(program)
            .args(&full)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| TunnelError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(TunnelError::Exit {
                command: rendered,
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

impl Tunnel for TailscaleCli {
    async fn self_status(&self) -> Result<String, TunnelError> {
        self.query(&["status", "--self"]).await
    }

    async fn status(&self) -> Result<String, TunnelError> {
        self.query(&["status", "--json"]).await
    }

    async fn expose(&self, port: u16) -> Result<(), TunnelError> {
        let port = port.to_string();
        if self.background {
            self.funnel(&["--bg", &port]).await
        } else {
            self.funnel(&[&port]).await
        }
    }

    async fn reset(&self) -> Result<(), TunnelError> {
        self.funnel(&["reset"]).await
    }

    fn requires_privilege(&self) -> bool {
        self.is_elevated()
    }
}

fn check_output(rendered: String, output: Output) -> Result<String, TunnelError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(TunnelError::Exit {
            command: rendered,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
