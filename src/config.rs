/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::PathBuf;

/// Port the file server listens on when neither config nor CLI picks one.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Default port for `share` (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// How to drive the tunneling tool
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// How to launch and supervise the file server
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TunnelConfig {
    /// The tunneling CLI (e.g., "tailscale")
    pub command: String,

    /// Run `funnel` subcommands through `elevate_command`
    pub elevate: bool,

    /// Privilege escalation wrapper (e.g., "sudo", "doas")
    pub elevate_command: String,

    /// Pass `--bg` so `funnel <port>` returns instead of running in the foreground
    pub background: bool,

    /// Tailnet domain to use when the tool only reports a bare machine name
    pub domain: Option<String>,

    /// Domain suffix shown when nothing better can be found
    pub fallback_domain: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// The file server program; the port is appended as the last argument
    pub command: String,

    /// Arguments placed before the port
    pub args: Vec<String>,

    /// How long to probe for the server accepting connections
    pub readiness_timeout_ms: u64,

    /// How often the exposed session wakes to check for shutdown
    pub poll_interval_ms: u64,

    /// How long to wait after SIGTERM before force-killing the server
    pub terminate_timeout_secs: u64,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tunnel: TunnelConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            command: "tailscale".to_string(),
            elevate: true,
            elevate_command: "sudo".to_string(),
            background: false,
            domain: None,
            fallback_domain: "tailnet.ts.net".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "http.server".to_string()],
            readiness_timeout_ms: 3000,
            poll_interval_ms: 1000,
            terminate_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// resulting values are unusable.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. User config directory (~/.config/funneler/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("funneler").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Environment (FUNNELER_PORT, FUNNELER_TUNNEL__ELEVATE, ...)
        builder = builder.add_source(
            config::Environment::with_prefix("FUNNELER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("server.args"),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later, mid-session.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be between 1 and 65535");
        }
        if self.tunnel.command.trim().is_empty() {
            bail!("tunnel.command cannot be empty");
        }
        if self.tunnel.elevate && self.tunnel.elevate_command.trim().is_empty() {
            bail!("tunnel.elevate_command cannot be empty when tunnel.elevate is set");
        }
        if self.tunnel.fallback_domain.trim().is_empty() {
            bail!("tunnel.fallback_domain cannot be empty");
        }
        if self.server.command.trim().is_empty() {
            bail!("server.command cannot be empty");
        }
        if self.server.poll_interval_ms == 0 {
            bail!("server.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.tunnel.command, "tailscale");
        assert!(config.tunnel.elevate);
        assert_eq!(config.tunnel.elevate_command, "sudo");
        assert_eq!(config.tunnel.fallback_domain, "tailnet.ts.net");
        assert_eq!(config.server.command, "python3");
        assert_eq!(config.server.args, vec!["-m", "http.server"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
port = 9000

[tunnel]
elevate = false
domain = "example.ts.net"

[server]
command = "miniserve"
args = ["--port"]
"#,
        )?;

        let config = Config::load(Some(path))?;
        assert_eq!(config.port, 9000);
        assert!(!config.tunnel.elevate);
        assert_eq!(config.tunnel.domain.as_deref(), Some("example.ts.net"));
        // Untouched keys keep their defaults
        assert_eq!(config.tunnel.command, "tailscale");
        assert_eq!(config.server.command, "miniserve");
        assert_eq!(config.server.args, vec!["--port"]);
        assert_eq!(config.server.terminate_timeout_secs, 5);
        Ok(())
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = Config::load(Some(dir.path().join("nope.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_server_command() {
        let mut config = Config::default();
        config.server.command = "  ".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("server.command"), "{err}");
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = Config::default();
        config.server.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allows_empty_elevate_command_without_elevation() {
        let mut config = Config::default();
        config.tunnel.elevate = false;
        config.tunnel.elevate_command = String::new();
        assert!(config.validate().is_ok());
    }
}
