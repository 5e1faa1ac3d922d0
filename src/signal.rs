// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Interrupt and termination requests.
//!
//! Handlers are registered when [`ShutdownSignal::install`] is called, not
//! when it is first awaited, so a Ctrl+C during startup is queued instead of
//! killing the process before cleanup can run.

use std::fmt;
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Which request ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Terminate => f.write_str("termination request"),
        }
    }
}

/// Registered listeners for shutdown requests.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    /// Registers the handlers. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be registered.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Registers the handlers. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Never fails on this platform; Ctrl+C is registered on first wait.
    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next shutdown request.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Trigger {
        tokio::select! {
            _ = self.interrupt.recv() => Trigger::Interrupt,
            _ = self.terminate.recv() => Trigger::Terminate,
        }
    }

    /// Waits for the next shutdown request.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Trigger {
        let _ = tokio::signal::ctrl_c().await;
        Trigger::Interrupt
    }
}
