//! End-to-end tests driving the `funneler` binary against the mock tunnel CLI
//! and mock file server.

#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tempfile::TempDir;

const LINE_TIMEOUT: Duration = Duration::from_secs(15);

/// A temp workspace with a config pointing funneler at the mocks.
struct Harness {
    root: TempDir,
    share_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let share_dir = root.path().join("shared");
        std::fs::create_dir(&share_dir).unwrap();
        std::fs::write(share_dir.join("hello.txt"), "hello").unwrap();

        let config = format!(
            r#"
[tunnel]
command = "{mocktail}"
elevate = false

[server]
command = "{mockserve}"
args = []
readiness_timeout_ms = 5000
poll_interval_ms = 100
terminate_timeout_secs = 2
"#,
            mocktail = env!("CARGO_BIN_EXE_mocktail"),
            mockserve = env!("CARGO_BIN_EXE_mockserve"),
        );
        std::fs::write(root.path().join("funneler.toml"), config).unwrap();

        Self { root, share_dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn log(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("mocktail.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_funneler"));
        cmd.arg("--config")
            .arg(self.path("funneler.toml"))
            .args(args)
            .env("XDG_CONFIG_HOME", self.path("xdg"))
            .env("MOCKTAIL_LOG", self.path("mocktail.log"))
            .env("MOCKSERVE_PIDFILE", self.path("server.pid"))
            .env_remove("RUST_LOG")
            .stdin(Stdio::null());
        cmd
    }

    fn run(&self, args: &[&str], env: &[(&str, &str)]) -> Output {
        let mut cmd = self.command(args);
        cmd.envs(env.iter().copied());
        cmd.output().expect("Failed to run funneler")
    }

    fn server_pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.path("server.pid"))
            .ok()
            .and_then(|pid| pid.trim().parse().ok())
    }
}

/// A running `funneler share` with its stdout streamed line by line.
struct Running {
    child: Child,
    lines: Receiver<String>,
    seen: Vec<String>,
}

impl Running {
    fn spawn(mut cmd: Command) -> Self {
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn funneler");
        let stdout = child.stdout.take().expect("Failed to get stdout");

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            child,
            lines,
            seen: Vec::new(),
        }
    }

    fn wait_for_line(&mut self, wanted: &str) {
        while let Ok(line) = self.lines.recv_timeout(LINE_TIMEOUT) {
            let found = line == wanted;
            self.seen.push(line);
            if found {
                return;
            }
        }
        panic!("never saw {wanted:?}; stdout so far: {:#?}", self.seen);
    }

    fn interrupt(&self) {
        let pid = Pid::from_raw(i32::try_from(self.child.id()).unwrap());
        kill(pid, Signal::SIGINT).unwrap();
    }

    /// Ctrl+C as a terminal delivers it: to every process in the group.
    fn interrupt_group(&self) {
        let pgid = Pid::from_raw(i32::try_from(self.child.id()).unwrap());
        killpg(pgid, Signal::SIGINT).unwrap();
    }

    fn finish(mut self) -> (std::process::ExitStatus, Vec<String>) {
        let status = self.child.wait().unwrap();
        self.seen.extend(self.lines.try_iter());
        (status, std::mem::take(&mut self.seen))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn is_running(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn share_args<'a>(dir: &'a Path, port: &'a str) -> [&'a str; 4] {
    [
        "share",
        dir.to_str().unwrap(),
        "--port",
        port,
    ]
}

#[test]
fn test_share_prints_url_and_cleans_up_on_sigint() {
    let harness = Harness::new();
    let mut running = Running::spawn(harness.command(&share_args(&harness.share_dir, "47611")));

    running.wait_for_line("https://host.example.ts.net/");
    let pid = harness.server_pid().expect("mock server wrote no pid");
    assert!(is_running(pid));

    running.interrupt();
    let (status, stdout) = running.finish();

    assert!(status.success(), "exit status {status}; stdout {stdout:#?}");
    assert!(stdout.iter().any(|l| l == "Funnel and file server stopped."));
    assert!(!is_running(pid), "file server {pid} survived");

    let log = harness.log();
    assert_eq!(log.first().map(String::as_str), Some("status --self"));
    assert_eq!(log.iter().filter(|l| *l == "funnel 47611").count(), 1);
    assert_eq!(log.iter().filter(|l| *l == "funnel reset").count(), 2);
}

#[test]
fn test_ctrl_c_while_funnel_configures_exits_zero() {
    let harness = Harness::new();
    let mut cmd = harness.command(&share_args(&harness.share_dir, "47617"));
    // The funnel command hangs, and shares funneler's process group
    cmd.env("MOCKTAIL_BLOCK", "expose").process_group(0);
    let mut running = Running::spawn(cmd);

    running.wait_for_line("Configuring Tailscale Funnel...");
    let deadline = Instant::now() + LINE_TIMEOUT;
    while !harness.log().iter().any(|l| l == "funnel 47617") && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let pid = harness.server_pid().expect("mock server wrote no pid");

    running.interrupt_group();
    let (status, stdout) = running.finish();

    assert_eq!(status.code(), Some(0), "stdout {stdout:#?}");
    assert!(stdout.iter().any(|l| l == "Funnel and file server stopped."));
    assert!(!stdout.iter().any(|l| l.starts_with("https://")));
    assert!(!is_running(pid), "file server {pid} survived");
    assert_eq!(harness.log().iter().filter(|l| *l == "funnel reset").count(), 2);
}

#[test]
fn test_default_command_is_share() {
    let harness = Harness::new();
    let mut cmd = harness.command(&[harness.share_dir.to_str().unwrap(), "-p", "47612"]);
    cmd.env("MOCKTAIL_SELF", "100.64.0.2 laptop user@ linux -")
        .env("MOCKTAIL_SUFFIX", "corp-net.ts.net");
    let mut running = Running::spawn(cmd);

    running.wait_for_line("https://laptop.corp-net.ts.net/");
    running.interrupt();
    let (status, _) = running.finish();
    assert!(status.success());
    assert!(harness.log().iter().any(|l| l == "status --json"));
}

#[test]
fn test_funnel_failure_exits_one_and_stops_server() {
    let harness = Harness::new();
    let dir = harness.share_dir.to_str().unwrap();
    let output = harness.run(&["share", dir, "-p", "47613"], &[("MOCKTAIL_FAIL", "expose")]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to configure Tailscale Funnel for port 47613"),
        "{stderr}"
    );

    let pid = harness.server_pid().expect("mock server wrote no pid");
    assert!(!is_running(pid), "file server {pid} survived");
    let log = harness.log();
    assert_eq!(log.iter().filter(|l| *l == "funnel reset").count(), 2);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("https://"));
}

#[test]
fn test_missing_directory_exits_one_without_side_effects() {
    let harness = Harness::new();
    let missing = harness.path("nope");
    let output = harness.run(&["share", missing.to_str().unwrap(), "-p", "47614"], &[]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "{stderr}");
    assert!(harness.log().is_empty());
    assert!(harness.server_pid().is_none());
}

#[test]
fn test_discovery_failure_exits_one() {
    let harness = Harness::new();
    let dir = harness.share_dir.to_str().unwrap();
    let output = harness.run(&["share", dir, "-p", "47615"], &[("MOCKTAIL_FAIL", "self")]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Is Tailscale running?"), "{stderr}");
    assert_eq!(harness.log(), vec!["status --self"]);
    assert!(harness.server_pid().is_none());
}

#[test]
fn test_status_prints_url() {
    let harness = Harness::new();
    let output = harness.run(&["status"], &[]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("URL:     https://host.example.ts.net/"), "{stdout}");
    assert_eq!(harness.log(), vec!["status --self"]);
}

#[test]
fn test_reset_never_fails() {
    let harness = Harness::new();
    let output = harness.run(&["reset", "-p", "47616"], &[("MOCKTAIL_FAIL", "reset")]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No file server running on port 47616."), "{stdout}");
    assert!(stdout.contains("Warning: Failed to reset Tailscale Funnel."), "{stdout}");
    assert_eq!(harness.log(), vec!["funnel reset"]);
}

#[test]
fn test_invalid_config_exits_one() {
    let harness = Harness::new();
    let output = harness.run(&["status"], &[("FUNNELER_SERVER__POLL_INTERVAL_MS", "0")]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"), "{stderr}");
    assert!(harness.log().is_empty());
}
