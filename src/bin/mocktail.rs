// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A scriptable stand-in for the `tailscale` CLI.
//!
//! Understands the subset funneler uses: `status --self`, `status --json`,
//! `funnel [--bg] <port>` and `funnel reset`. Behavior comes from the
//! environment:
//!
//! - `MOCKTAIL_LOG`: file to append one line per invocation to.
//! - `MOCKTAIL_SELF`: the `status --self` line.
//! - `MOCKTAIL_SUFFIX`: `MagicDNSSuffix` reported by `status --json`.
//! - `MOCKTAIL_FAIL`: comma-separated operations that exit 1
//!   (`self`, `json`, `expose`, `reset`).
//! - `MOCKTAIL_BLOCK`: comma-separated operations that hang until killed.

#![allow(clippy::print_stdout, reason = "Mock CLI writes its results to stdout")]
#![allow(clippy::print_stderr, reason = "Mock CLI reports failures on stderr")]

use std::fs::OpenOptions;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

const DEFAULT_SELF: &str = "100.64.0.1 host.example.ts.net. user@ linux -";

/// Mock tunnel CLI for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mocktail")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report machine status.
    Status {
        /// Only this machine, one line.
        #[arg(long = "self")]
        self_only: bool,

        /// Machine-readable output.
        #[arg(long)]
        json: bool,
    },

    /// Expose a port, or `reset` to stop exposing.
    Funnel {
        /// Run in the background.
        #[arg(long)]
        bg: bool,

        /// A port number or `reset`.
        target: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (operation, invocation) = match &args.command {
        Command::Status { json: true, .. } => ("json", "status --json".to_string()),
        Command::Status { self_only, .. } => {
            if *self_only {
                ("self", "status --self".to_string())
            } else {
                ("self", "status".to_string())
            }
        }
        Command::Funnel { target, .. } if target == "reset" => {
            ("reset", "funnel reset".to_string())
        }
        Command::Funnel { bg, target } => {
            let flag = if *bg { "--bg " } else { "" };
            ("expose", format!("funnel {flag}{target}"))
        }
    };

    log_invocation(&invocation);

    if listed("MOCKTAIL_BLOCK", operation) {
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
    if listed("MOCKTAIL_FAIL", operation) {
        eprintln!("mocktail: {invocation} failed");
        return ExitCode::FAILURE;
    }

    match operation {
        "self" => {
            let line = std::env::var("MOCKTAIL_SELF").unwrap_or_else(|_| DEFAULT_SELF.to_string());
            println!("{line}");
        }
        "json" => {
            let status = serde_json::json!({
                "MagicDNSSuffix": std::env::var("MOCKTAIL_SUFFIX").unwrap_or_default(),
            });
            println!("{status}");
        }
        _ => {}
    }
    ExitCode::SUCCESS
}

fn listed(var: &str, operation: &str) -> bool {
    std::env::var(var)
        .is_ok_and(|list| list.split(',').any(|op| op.trim() == operation))
}

fn log_invocation(invocation: &str) {
    let Ok(path) = std::env::var("MOCKTAIL_LOG") else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{invocation}");
    }
}
