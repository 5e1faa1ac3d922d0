// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Build script that stamps the binary with a git-derived version.
//!
//! `git describe --tags --always --dirty` yields strings like `0.1.0`,
//! `0.1.0-2-gabc1234` or `0.1.0-2-gabc1234-dirty`. Without git (for example
//! when building from a source tarball) the crate version is used instead.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let version = describe().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=FUNNELER_VERSION={version}");
}

fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let desc = String::from_utf8(output.stdout).ok()?;
    let desc = desc.trim();
    if desc.is_empty() {
        return None;
    }

    // Tags are written as v0.1.0
    Some(desc.strip_prefix('v').unwrap_or(desc).to_string())
}
