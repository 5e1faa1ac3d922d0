// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Funneler command line.
//!
//! `funneler [DIR]` shares a directory until Ctrl+C. `status` shows the URL a
//! share would get and `reset` clears leftovers from a crashed run.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use funneler::cli::ColorConfig;
use funneler::config::Config;
use funneler::discovery::{self, DiscoverySettings};
use funneler::error::ShareError;
use funneler::server::FileServer;
use funneler::session::{self, Session, SessionSettings, ShareRequest};
use funneler::signal::ShutdownSignal;
use funneler::tunnel::TailscaleCli;

/// Command-line arguments for Funneler.
#[derive(Parser, Debug)]
#[command(name = "funneler")]
#[command(about = "Share a local directory publicly through Tailscale Funnel")]
#[command(version = env!("FUNNELER_VERSION"))]
#[command(after_help = "A directory named like a subcommand must be written as a path, e.g. `funneler ./status`.")]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    share: ShareArgs,

    /// Port for the local file server (overrides the config file).
    #[arg(short, long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    nocolor: bool,
}

/// Arguments of the `share` command, also accepted without a subcommand.
#[derive(clap::Args, Debug)]
struct ShareArgs {
    /// Directory to share (defaults to the current directory). Write a
    /// directory named `share`, `status` or `reset` as `./status`.
    directory: Option<PathBuf>,
}

/// Subcommands supported by Funneler.
#[derive(Subcommand, Debug)]
enum Command {
    /// Share a directory until interrupted (default if no subcommand given).
    Share(ShareArgs),

    /// Show the public URL a share would use.
    Status,

    /// Stop a leftover file server and reset the funnel.
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    let colors = ColorConfig::new(args.nocolor);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", colors.red("Error:"));
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        None => run_share(&config, args.share, colors).await,
        Some(Command::Share(share)) => run_share(&config, share, colors).await,
        Some(Command::Status) => run_status(&config).await,
        Some(Command::Reset) => {
            run_reset(&config).await;
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", colors.red("Error:"));
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "funneler=debug"
    } else {
        "funneler=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

/// Runs a sharing session until SIGINT/SIGTERM.
async fn run_share(config: &Config, args: ShareArgs, colors: ColorConfig) -> Result<(), ShareError> {
    // Registered before any side effect so an early Ctrl+C still cleans up
    let mut signal = ShutdownSignal::install()
        .map_err(|e| ShareError::Runtime(format!("Cannot install signal handlers: {e}")))?;
    let shutdown = async move {
        let trigger = signal.recv().await;
        info!("Received {trigger}");
    };

    let mut session = Session::new(
        TailscaleCli::from_config(&config.tunnel),
        FileServer::from_config(&config.server),
        SessionSettings::from_config(config),
    )
    .with_colors(colors);

    let request = ShareRequest {
        directory: args.directory,
        port: config.port,
    };
    let result = session.share(request, shutdown).await;
    drop(session);
    result
}

/// Prints the URL a share would be published at.
async fn run_status(config: &Config) -> Result<(), ShareError> {
    let tunnel = TailscaleCli::from_config(&config.tunnel);
    let identity =
        discovery::discover(&tunnel, &DiscoverySettings::from_config(&config.tunnel)).await?;
    let url = identity.public_url()?;

    println!("Machine: {}", identity.name);
    println!("Domain:  {}", identity.domain);
    println!("URL:     {url}");
    println!("Port:    {}", config.port);
    Ok(())
}

/// Clears leftovers from an earlier run. Never fails.
async fn run_reset(config: &Config) {
    let tunnel = TailscaleCli::from_config(&config.tunnel);
    let server = FileServer::from_config(&config.server);

    println!("Cleaning up any previous instances...");
    let report = session::reset_stale(&tunnel, &server, config.port).await;

    if report.killed_server {
        println!("Stopped file server on port {}.", config.port);
    } else {
        println!("No file server running on port {}.", config.port);
    }
    if report.funnel_reset {
        println!("Funnel reset.");
    } else {
        println!("Warning: Failed to reset Tailscale Funnel.");
    }
}
