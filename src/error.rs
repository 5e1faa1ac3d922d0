// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for a sharing session.
//!
//! Every variant is terminal for the current session. None are retried; the
//! user re-runs the command.

use std::path::Path;
use thiserror::Error;

/// A failed invocation of the external tunneling tool.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The command could not be started at all (not installed, not on PATH).
    #[error("could not run `{command}`: {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The command ran but reported failure.
    #[error("`{command}` failed ({status}){}", stderr_suffix(.stderr))]
    Exit {
        /// The command line that was run.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error, if any was captured.
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Why a sharing session ended unsuccessfully.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Bad input. Raised before any side effect.
    #[error("{0}")]
    Validation(String),

    /// The tunneling tool's status was unavailable or unparseable.
    #[error("{0}")]
    Discovery(String),

    /// Exposing the port through the tunnel failed.
    #[error("failed to configure Tailscale Funnel for port {port}: {source}")]
    TunnelConfig {
        /// The port that was being exposed.
        port: u16,
        /// The failed tunnel command.
        #[source]
        source: TunnelError,
    },

    /// Any other fault while starting or running the file server.
    #[error("{0}")]
    Runtime(String),
}

impl ShareError {
    /// Directory that does not exist.
    #[must_use]
    pub fn missing_directory(path: &Path) -> Self {
        Self::Validation(format!("directory '{}' does not exist", path.display()))
    }

    /// Path that exists but is not a directory.
    #[must_use]
    pub fn not_a_directory(path: &Path) -> Self {
        Self::Validation(format!("'{}' is not a directory", path.display()))
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_)
            | Self::Discovery(_)
            | Self::TunnelConfig { .. }
            | Self::Runtime(_) => 1,
        }
    }
}
