// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Funneler shares a local directory over the public internet through
//! Tailscale Funnel.
//!
//! It starts a static file server for the directory, exposes the server's
//! port through the funnel, prints the public URL and, when interrupted,
//! stops the server and resets the funnel again.

/// Terminal colors and duration formatting.
pub mod cli;
/// Layered configuration for the tunnel and the file server.
pub mod config;
/// Discovery of the machine's public host name.
pub mod discovery;
/// Error types and exit codes.
pub mod error;
/// File server process management.
pub mod server;
/// The sharing session and its teardown.
pub mod session;
/// Shutdown signal handling.
pub mod signal;
/// The tunneling tool abstraction and its Tailscale driver.
pub mod tunnel;
