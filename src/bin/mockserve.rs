// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A minimal stand-in for the static file server.
//!
//! Binds `0.0.0.0:<port>` and accepts connections until killed, closing each
//! one immediately. With `MOCKSERVE_PIDFILE` set, writes its pid there once
//! listening.

#![allow(clippy::print_stderr, reason = "Mock server reports failures on stderr")]

use std::net::TcpListener;
use std::process::ExitCode;

use clap::Parser;

/// Mock file server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockserve")]
struct Args {
    /// Port to listen on.
    port: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mockserve: cannot bind port {}: {e}", args.port);
            return ExitCode::FAILURE;
        }
    };

    if let Ok(path) = std::env::var("MOCKSERVE_PIDFILE")
        && let Err(e) = std::fs::write(&path, std::process::id().to_string())
    {
        eprintln!("mockserve: cannot write {path}: {e}");
    }

    for stream in listener.incoming() {
        drop(stream);
    }
    ExitCode::SUCCESS
}
